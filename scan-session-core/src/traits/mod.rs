pub mod image_processor;
pub mod scan_driver;
pub mod session_observer;
