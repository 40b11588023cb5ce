pub mod attendance;
pub mod classes;
pub mod core;
pub mod exchange;
pub mod grades;
pub mod homework;
pub mod schedule;
pub mod sessions;
pub mod settings;
pub mod students;
pub mod subjects;
pub mod years;
