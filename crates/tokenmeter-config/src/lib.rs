pub mod loader;
pub mod schema;

pub use loader::{CONFIG_ENV, find_config_path, load_config, resolve_dir, save_config};
pub use schema::{Config, ModelPricing, StorageConfig};
