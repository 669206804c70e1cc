//! Tasks that make up the firmware as well as the resources they use.
//! Each task owns its peripherals and runs one of the library's services on them.
pub mod clock;
pub mod moisture;
pub mod network;
pub mod resources;
pub mod watering;
