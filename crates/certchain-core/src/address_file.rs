//! Deployed contract address persistence.

use certchain_types::Address;
use std::path::Path;

use crate::error::AddressFileError;

/// Read the address stored at `path`, ignoring surrounding whitespace.
pub fn read_address(path: impl AsRef<Path>) -> Result<Address, AddressFileError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| AddressFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    text.trim()
        .parse::<Address>()
        .map_err(|e| AddressFileError::Invalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Store `address` at `path`, creating the parent directory if needed.
pub fn write_address(path: impl AsRef<Path>, address: &Address) -> Result<(), AddressFileError> {
    let path = path.as_ref();
    let io_error = |source| AddressFileError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, format!("{}\n", address)).map_err(io_error)
}
