//! Compiled contract artifacts.
//!
//! Reads the solc `--combined-json abi,bin` document:
//!
//! ```json
//! {"contracts": {"contract.sol:Storage": {"abi": [...], "bin": "6080..."}}}
//! ```
//!
//! The document is read once; each contract is parsed on first use and
//! cached for the lifetime of the store.

use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::abi::{AbiError, ContractInterface, Token};
use crate::error::ArtifactError;

/// `<source>:<Contract>` key of a compiled contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub source: String,
    pub contract: String,
}

impl ArtifactKey {
    pub fn new(source: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            contract: contract.into(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.contract)
    }
}

impl FromStr for ArtifactKey {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // source paths may themselves contain ':'
        match s.rsplit_once(':') {
            Some((source, contract)) if !source.is_empty() && !contract.is_empty() => {
                Ok(Self::new(source, contract))
            }
            _ => Err(ArtifactError::InvalidKey(s.to_string())),
        }
    }
}

/// A compiled contract: its interface and creation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    key: ArtifactKey,
    interface: ContractInterface,
    payload: Vec<u8>,
}

impl ContractArtifact {
    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    pub fn interface(&self) -> &ContractInterface {
        &self.interface
    }

    /// Creation bytecode without constructor arguments.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Creation bytecode followed by the encoded constructor arguments.
    pub fn creation_payload(&self, args: &[Token]) -> Result<Vec<u8>, AbiError> {
        let mut data = self.payload.clone();
        data.extend(self.interface.encode_constructor(args)?);
        Ok(data)
    }
}

#[derive(Debug, Deserialize)]
struct CombinedJson {
    contracts: HashMap<String, serde_json::Value>,
}

/// Lookup of compiled contracts by key.
#[derive(Debug)]
pub struct ArtifactStore {
    contracts: HashMap<String, serde_json::Value>,
    cache: RwLock<HashMap<ArtifactKey, Arc<ContractArtifact>>>,
}

impl ArtifactStore {
    /// Read the artifact document at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded artifact document");
        Self::from_json_str(&text)
    }

    /// Build a store from an in-memory document.
    pub fn from_json_str(text: &str) -> Result<Self, ArtifactError> {
        let document: CombinedJson = serde_json::from_str(text)?;
        Ok(Self {
            contracts: document.contracts,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Keys present in the document.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.contracts.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn load(&self, source: &str, contract: &str) -> Result<Arc<ContractArtifact>, ArtifactError> {
        self.load_key(&ArtifactKey::new(source, contract))
    }

    pub fn load_key(&self, key: &ArtifactKey) -> Result<Arc<ContractArtifact>, ArtifactError> {
        if let Some(artifact) = self.cache.read().get(key) {
            return Ok(artifact.clone());
        }

        let name = key.to_string();
        let entry = self
            .contracts
            .get(&name)
            .ok_or_else(|| ArtifactError::NotFound { key: name.clone() })?;
        let artifact = Arc::new(parse_entry(key, entry)?);

        let mut cache = self.cache.write();
        Ok(cache.entry(key.clone()).or_insert(artifact).clone())
    }
}

fn parse_entry(key: &ArtifactKey, entry: &serde_json::Value) -> Result<ContractArtifact, ArtifactError> {
    let malformed = |reason: String| ArtifactError::Malformed {
        key: key.to_string(),
        reason,
    };

    let abi = entry
        .get("abi")
        .ok_or_else(|| malformed("missing abi".to_string()))?;
    let interface = ContractInterface::from_json(abi).map_err(|e| malformed(e.to_string()))?;

    let bin = entry
        .get("bin")
        .and_then(|b| b.as_str())
        .ok_or_else(|| malformed("missing bin".to_string()))?;
    let bin = bin.strip_prefix("0x").unwrap_or(bin);
    if bin.is_empty() {
        return Err(malformed("empty bin".to_string()));
    }
    let payload = hex::decode(bin).map_err(|e| malformed(format!("bin is not hex: {}", e)))?;

    Ok(ContractArtifact {
        key: key.clone(),
        interface,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn document(abi: &str, bin: &str) -> String {
        format!(
            r#"{{"contracts":{{"contract.sol:Storage":{{"abi":{},"bin":"{}"}}}},"version":"0.8.19"}}"#,
            abi, bin
        )
    }

    const ABI: &str = r#"[{"inputs":[{"name":"id","type":"string"}],"name":"retrieveKey","outputs":[{"name":"","type":"string"}],"stateMutability":"view","type":"function"}]"#;

    #[test]
    fn test_key_parsing() {
        let key: ArtifactKey = "contract.sol:Storage".parse().unwrap();
        assert_eq!(key, ArtifactKey::new("contract.sol", "Storage"));
        assert_eq!(key.to_string(), "contract.sol:Storage");

        let key: ArtifactKey = "C:/src/contract.sol:Storage".parse().unwrap();
        assert_eq!(key.source, "C:/src/contract.sol");

        assert!("Storage".parse::<ArtifactKey>().is_err());
        assert!("contract.sol:".parse::<ArtifactKey>().is_err());
    }

    #[test]
    fn test_load_artifact() {
        let store = ArtifactStore::from_json_str(&document(ABI, "0x6080")).unwrap();
        let artifact = store.load("contract.sol", "Storage").unwrap();

        assert_eq!(artifact.payload(), &[0x60, 0x80]);
        assert!(artifact.interface().function("retrieveKey", None).is_ok());
        assert_eq!(artifact.creation_payload(&[]).unwrap(), vec![0x60, 0x80]);
    }

    #[test]
    fn test_abi_given_as_string() {
        let quoted = serde_json::to_string(ABI).unwrap();
        let store = ArtifactStore::from_json_str(&document(&quoted, "6080")).unwrap();
        let artifact = store.load("contract.sol", "Storage").unwrap();
        assert_eq!(artifact.interface().functions().len(), 1);
    }

    #[test]
    fn test_artifact_is_cached() {
        let store = ArtifactStore::from_json_str(&document(ABI, "6080")).unwrap();
        let first = store.load("contract.sol", "Storage").unwrap();
        let second = store.load("contract.sol", "Storage").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_key() {
        let store = ArtifactStore::from_json_str(&document(ABI, "6080")).unwrap();
        let err = store.load("contract.sol", "Registry").unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { key } if key == "contract.sol:Registry"));
    }

    #[test]
    fn test_malformed_entries() {
        let store = ArtifactStore::from_json_str(&document(ABI, "zz")).unwrap();
        assert!(matches!(
            store.load("contract.sol", "Storage"),
            Err(ArtifactError::Malformed { .. })
        ));

        let store = ArtifactStore::from_json_str(&document(r#"{"bad":1}"#, "6080")).unwrap();
        assert!(matches!(
            store.load("contract.sol", "Storage"),
            Err(ArtifactError::Malformed { .. })
        ));

        let store = ArtifactStore::from_json_str(&document(ABI, "")).unwrap();
        assert!(matches!(
            store.load("contract.sol", "Storage"),
            Err(ArtifactError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unparseable_document() {
        assert!(matches!(
            ArtifactStore::from_json_str("{not json"),
            Err(ArtifactError::Document(_))
        ));
    }

    #[test]
    fn test_open_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(document(ABI, "6080").as_bytes()).unwrap();

        let store = ArtifactStore::open(file.path()).unwrap();
        assert_eq!(store.keys(), vec!["contract.sol:Storage".to_string()]);

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            ArtifactStore::open(&missing),
            Err(ArtifactError::Io { .. })
        ));
    }
}
