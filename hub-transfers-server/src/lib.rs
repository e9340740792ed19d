mod config;
mod server;
mod settings;

pub use config::load_chains_from_file;
pub use server::run;
pub use settings::Settings;
