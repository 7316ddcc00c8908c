pub mod annotations;
pub mod attendance;
pub mod classrooms;
pub mod core;
pub mod dashboard;
pub mod enrollments;
pub mod evaluations;
pub mod grades;
pub mod parents;
pub mod payments;
pub mod payroll;
pub mod plans;
pub mod reports;
pub mod schedules;
pub mod students;
pub mod tasks;
pub mod workers;
