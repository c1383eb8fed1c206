pub mod lock;
pub mod record;
pub mod registry;
pub mod scan;
