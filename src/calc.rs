//! Small numeric helpers shared by the grade, attendance, payment and
//! schedule handlers.

/// Qualitative grade scale, best first.
pub const GRADE_SCALE: [&str; 4] = ["AD", "A", "B", "C"];

pub fn grade_points(grade: &str) -> Option<u8> {
    match grade {
        "AD" => Some(4),
        "A" => Some(3),
        "B" => Some(2),
        "C" => Some(1),
        _ => None,
    }
}

pub fn grade_for_points(points: u8) -> &'static str {
    match points {
        4..=u8::MAX => "AD",
        3 => "A",
        2 => "B",
        _ => "C",
    }
}

/// Mean of the grade points, rounded half up, mapped back to a letter.
/// Unknown letters are ignored; `None` when nothing is gradable.
pub fn average_grade<'a, I>(grades: I) -> Option<&'static str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut sum: u32 = 0;
    let mut count: u32 = 0;
    for g in grades {
        if let Some(p) = grade_points(g) {
            sum += u32::from(p);
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    let mean = f64::from(sum) / f64::from(count);
    let rounded = (mean + 0.5).floor().clamp(1.0, 4.0) as u8;
    Some(grade_for_points(rounded))
}

/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn round_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Share of attended days (present or late) in percent, 1 decimal.
pub fn attendance_rate(attended: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_off_1_decimal(attended as f64 * 100.0 / total as f64)
}

/// Parses `HH:MM` into minutes after midnight.
pub fn parse_hhmm(raw: &str) -> Option<u32> {
    let (h, m) = raw.trim().split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Half-open intervals `[start, end)` overlap.
pub fn slots_overlap(a: (u32, u32), b: (u32, u32)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_rounds_half_up() {
        assert_eq!(average_grade(["AD", "A"]), Some("AD"));
        assert_eq!(average_grade(["A", "B"]), Some("A"));
        assert_eq!(average_grade(["B", "C", "C"]), Some("C"));
        assert_eq!(average_grade(["AD", "C"]), Some("A"));
    }

    #[test]
    fn average_ignores_unknown_letters() {
        assert_eq!(average_grade(["X", "B"]), Some("B"));
        assert_eq!(average_grade(std::iter::empty::<&str>()), None);
    }

    #[test]
    fn attendance_rate_handles_empty_and_rounds() {
        assert_eq!(attendance_rate(0, 0), 0.0);
        assert_eq!(attendance_rate(2, 3), 66.7);
        assert_eq!(attendance_rate(5, 5), 100.0);
    }

    #[test]
    fn hhmm_parsing_is_strict() {
        assert_eq!(parse_hhmm("08:30"), Some(510));
        assert_eq!(parse_hhmm("8:30"), None);
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("10:60"), None);
    }

    #[test]
    fn touching_slots_do_not_overlap() {
        assert!(!slots_overlap((480, 540), (540, 600)));
        assert!(slots_overlap((480, 545), (540, 600)));
        assert!(slots_overlap((500, 520), (480, 600)));
    }

    #[test]
    fn cents_rounding() {
        assert_eq!(round_cents(1234.5678), 1234.57);
        assert_eq!(round_cents(0.13 * 1850.0), 240.5);
    }
}
