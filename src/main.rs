mod calc;
mod config;
mod db;
mod demo;
mod ipc;
mod logging;
mod seed;

use std::io::{self, BufRead, Write};

use log::{error, info, warn};

fn main() {
    let config = match config::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("nidod: invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = logging::init_logging(&config.log.level) {
        eprintln!("nidod: {e}");
        std::process::exit(1);
    }
    info!(
        "event=config_load module=config status=ok query_ms={}-{} mutation_ms={}-{} seed={}",
        config.demo.query_min_ms,
        config.demo.query_max_ms,
        config.demo.mutation_min_ms,
        config.demo.mutation_max_ms,
        config.demo.seed
    );

    let conn = match db::open_store() {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("nidod: failed to open store: {e:?}");
            std::process::exit(1);
        }
    };
    let mut seeded = false;
    if config.demo.seed {
        match seed::seed(&conn, &config.payroll) {
            Ok(()) => seeded = true,
            // An empty store is still usable; demo.reset can retry.
            Err(e) => warn!("event=seed module=seed status=error error={e:?}"),
        }
    }

    let mut state = ipc::AppState {
        db: conn,
        demo: demo::DemoSettings::from(&config.demo),
        config,
        seeded,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!("event=stdin_read status=error error={e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // No id to echo back when the line does not parse.
                warn!("event=bad_json error={e}");
                ipc::err("", "bad_json", e.to_string(), None)
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
