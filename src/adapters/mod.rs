pub mod api;
pub mod db;
pub mod open_meteo;
pub mod store;
pub mod telemetry_script;
