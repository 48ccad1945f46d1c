pub mod doctor;
pub mod status;
pub mod stop;
