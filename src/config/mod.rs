pub mod loader;
pub mod types;

pub use loader::{
    get_config_path, get_config_path_or_default, init_config, load_config, load_config_from_path, save_config_to_path,
};
pub use types::{ConnectionConfig, EditConfig, NotewrightConfig};
