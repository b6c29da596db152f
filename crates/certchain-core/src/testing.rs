//! Shared fixtures for unit tests.

use certchain_rpc::mock::MockNode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::abi::{self, ParamType, Token};
use crate::artifact::{ArtifactStore, ContractArtifact};

/// ABI of the storage contract as solc emits it.
pub const STORAGE_ABI: &str = r#"[
    {"inputs":[],"stateMutability":"nonpayable","type":"constructor"},
    {"inputs":[{"internalType":"address","name":"account","type":"address"}],
     "name":"hasWritePrivilege","outputs":[{"internalType":"bool","name":"","type":"bool"}],
     "stateMutability":"view","type":"function"},
    {"inputs":[{"internalType":"string","name":"id","type":"string"}],
     "name":"retrieveKey","outputs":[{"internalType":"string","name":"","type":"string"}],
     "stateMutability":"view","type":"function"},
    {"inputs":[{"internalType":"string","name":"id","type":"string"},{"internalType":"string","name":"key","type":"string"}],
     "name":"storeKey","outputs":[],"stateMutability":"nonpayable","type":"function"}
]"#;

pub fn storage_artifact() -> Arc<ContractArtifact> {
    let document = format!(
        r#"{{"contracts":{{"contract.sol:Storage":{{"abi":{},"bin":"608060405234801561001057600080fd5b50"}}}}}}"#,
        STORAGE_ABI
    );
    ArtifactStore::from_json_str(&document)
        .and_then(|store| store.load("contract.sol", "Storage"))
        .unwrap()
}

/// Make `node` behave like a deployed storage contract. Returns the
/// contract's key map.
pub fn emulate_storage(node: &MockNode, writer: certchain_types::Address) -> Arc<Mutex<HashMap<String, String>>> {
    let keys = Arc::new(Mutex::new(HashMap::new()));

    let store = keys.clone();
    node.on_send(move |call| {
        if call.method_name() == Some("storeKey") {
            let args = abi::decode(&[ParamType::String, ParamType::String], &call.data()[4..]).unwrap();
            if let [Token::String(id), Token::String(key)] = args.as_slice() {
                store.lock().insert(id.clone(), key.clone());
            }
        }
    });

    let read = keys.clone();
    node.on_call(move |call| {
        let body = &call.data()[4..];
        let output = match call.method_name() {
            Some("retrieveKey") => {
                let id = abi::decode(&[ParamType::String], body).unwrap().remove(0).into_string().unwrap();
                let key = read.lock().get(&id).cloned().unwrap_or_default();
                abi::encode(&[ParamType::String], &[Token::String(key)])
            }
            Some("hasWritePrivilege") => {
                let allowed = matches!(
                    abi::decode(&[ParamType::Address], body).unwrap().as_slice(),
                    [Token::Address(account)] if *account == writer
                );
                abi::encode(&[ParamType::Bool], &[Token::Bool(allowed)])
            }
            _ => Ok(Vec::new()),
        };
        Ok(output.unwrap())
    });

    keys
}
