pub mod attendance;
pub mod classes;
pub mod core;
pub mod exports;
pub mod session;
pub mod settings;
pub mod students;
