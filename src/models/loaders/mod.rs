mod toml_loader;

pub use toml_loader::{load_mapping_document, load_profile_catalog, parse_mapping_document};
