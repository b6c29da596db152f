//! Contract ABI codec.
//!
//! Covers the parameter types the storage contract uses: `address`, `bool`,
//! `uint<N>` (values up to 128 bits), `string` and `bytes`. Interfaces are
//! read from the solc JSON ABI; parameter types are resolved when a call is
//! encoded or decoded, so an interface that mentions other types still loads.

use certchain_types::{Address, Hash};
use serde::Deserialize;
use thiserror::Error;

const WORD: usize = 32;

/// ABI codec errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AbiError {
    #[error("Invalid interface description: {0}")]
    InvalidInterface(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function} expects {expected} argument(s), got {got}")]
    ArgumentCount {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: &'static str },

    #[error("Unsupported ABI type: {0}")]
    UnsupportedType(String),

    #[error("Value does not fit {0}")]
    Overflow(String),

    #[error("Return data truncated")]
    Truncated,

    #[error("Return data is not valid UTF-8")]
    InvalidUtf8,
}

/// ABI result type.
pub type AbiResult<T> = Result<T, AbiError>;

/// Supported parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Bool,
    /// Unsigned integer of the given bit width
    Uint(u16),
    String,
    Bytes,
}

impl ParamType {
    /// Resolve a solidity type name.
    pub fn parse(name: &str) -> AbiResult<Self> {
        match name {
            "address" => Ok(Self::Address),
            "bool" => Ok(Self::Bool),
            "string" => Ok(Self::String),
            "bytes" => Ok(Self::Bytes),
            "uint" => Ok(Self::Uint(256)),
            _ => {
                let bits = name
                    .strip_prefix("uint")
                    .and_then(|b| b.parse::<u16>().ok())
                    .filter(|b| *b > 0 && *b <= 256 && b % 8 == 0)
                    .ok_or_else(|| AbiError::UnsupportedType(name.to_string()))?;
                Ok(Self::Uint(bits))
            }
        }
    }

    fn is_dynamic(&self) -> bool {
        matches!(self, Self::String | Self::Bytes)
    }

    fn name(&self) -> String {
        match self {
            Self::Address => "address".to_string(),
            Self::Bool => "bool".to_string(),
            Self::Uint(bits) => format!("uint{}", bits),
            Self::String => "string".to_string(),
            Self::Bytes => "bytes".to_string(),
        }
    }
}

/// A value passed to or returned from a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Bool(bool),
    Uint(u128),
    String(String),
    Bytes(Vec<u8>),
}

impl Token {
    fn type_name(&self) -> &'static str {
        match self {
            Token::Address(_) => "address",
            Token::Bool(_) => "bool",
            Token::Uint(_) => "uint",
            Token::String(_) => "string",
            Token::Bytes(_) => "bytes",
        }
    }

    pub fn into_string(self) -> AbiResult<String> {
        match self {
            Token::String(s) => Ok(s),
            other => Err(AbiError::TypeMismatch {
                expected: "string".to_string(),
                got: other.type_name(),
            }),
        }
    }

    pub fn into_bool(self) -> AbiResult<bool> {
        match self {
            Token::Bool(b) => Ok(b),
            other => Err(AbiError::TypeMismatch {
                expected: "bool".to_string(),
                got: other.type_name(),
            }),
        }
    }
}

/// One parameter of a function in the JSON ABI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Param {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One JSON ABI entry.
#[derive(Debug, Clone, Deserialize)]
struct AbiEntry {
    #[serde(rename = "type", default = "default_entry_type")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    inputs: Vec<Param>,
    #[serde(default)]
    outputs: Vec<Param>,
    #[serde(default, rename = "stateMutability")]
    state_mutability: Option<String>,
    #[serde(default)]
    constant: Option<bool>,
}

fn default_entry_type() -> String {
    "function".to_string()
}

/// A callable function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub inputs: Vec<Param>,
    pub outputs: Vec<Param>,
    read_only: bool,
}

impl Function {
    /// Canonical signature, e.g. `storeKey(string,string)`.
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.inputs.iter().map(|p| canonical(&p.kind)).collect();
        format!("{}({})", self.name, types.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        selector(&self.signature())
    }

    /// `view`/`pure` (or legacy `constant`) functions.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Selector followed by the encoded arguments.
    pub fn encode_input(&self, args: &[Token]) -> AbiResult<Vec<u8>> {
        let types = param_types(&self.inputs)?;
        if types.len() != args.len() {
            return Err(AbiError::ArgumentCount {
                function: self.name.clone(),
                expected: types.len(),
                got: args.len(),
            });
        }
        let mut data = self.selector().to_vec();
        data.extend(encode(&types, args)?);
        Ok(data)
    }

    pub fn decode_output(&self, data: &[u8]) -> AbiResult<Vec<Token>> {
        decode(&param_types(&self.outputs)?, data)
    }
}

fn canonical(kind: &str) -> &str {
    match kind {
        "uint" => "uint256",
        "int" => "int256",
        other => other,
    }
}

fn param_types(params: &[Param]) -> AbiResult<Vec<ParamType>> {
    params.iter().map(|p| ParamType::parse(&p.kind)).collect()
}

/// A contract's parsed interface description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractInterface {
    functions: Vec<Function>,
    constructor_inputs: Vec<Param>,
}

impl ContractInterface {
    /// Parse a JSON ABI. Accepts the array itself or, as older solc
    /// `--combined-json` output has it, a string containing the array.
    pub fn from_json(value: &serde_json::Value) -> AbiResult<Self> {
        let entries: Vec<AbiEntry> = match value {
            serde_json::Value::String(text) => serde_json::from_str(text),
            other => serde_json::from_value(other.clone()),
        }
        .map_err(|e| AbiError::InvalidInterface(e.to_string()))?;

        let mut interface = ContractInterface::default();
        for entry in entries {
            match entry.kind.as_str() {
                "function" => {
                    if entry.name.is_empty() {
                        return Err(AbiError::InvalidInterface(
                            "function entry without a name".to_string(),
                        ));
                    }
                    let read_only = matches!(entry.state_mutability.as_deref(), Some("view" | "pure"))
                        || entry.constant == Some(true);
                    interface.functions.push(Function {
                        name: entry.name,
                        inputs: entry.inputs,
                        outputs: entry.outputs,
                        read_only,
                    });
                }
                "constructor" => interface.constructor_inputs = entry.inputs,
                _ => {}
            }
        }
        Ok(interface)
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Look up a function by name. Overloads are told apart by arity when
    /// `arity` is given.
    pub fn function(&self, name: &str, arity: Option<usize>) -> AbiResult<&Function> {
        self.functions
            .iter()
            .find(|f| f.name == name && arity.map_or(true, |n| f.inputs.len() == n))
            .ok_or_else(|| AbiError::UnknownFunction(name.to_string()))
    }

    /// Call data for `name(args...)`.
    pub fn encode_call(&self, name: &str, args: &[Token]) -> AbiResult<Vec<u8>> {
        self.function(name, Some(args.len()))
            .or_else(|_| self.function(name, None))?
            .encode_input(args)
    }

    pub fn decode_output(&self, name: &str, data: &[u8]) -> AbiResult<Vec<Token>> {
        self.function(name, None)?.decode_output(data)
    }

    /// Encoded constructor arguments, appended to the creation payload.
    pub fn encode_constructor(&self, args: &[Token]) -> AbiResult<Vec<u8>> {
        let types = param_types(&self.constructor_inputs)?;
        if types.len() != args.len() {
            return Err(AbiError::ArgumentCount {
                function: "constructor".to_string(),
                expected: types.len(),
                got: args.len(),
            });
        }
        encode(&types, args)
    }
}

/// First four bytes of the keccak-256 of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Hash::keccak(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash.as_bytes()[..4]);
    out
}

/// Encode `tokens` as the head/tail layout for `types`.
pub fn encode(types: &[ParamType], tokens: &[Token]) -> AbiResult<Vec<u8>> {
    let mut head = Vec::with_capacity(types.len() * WORD);
    let mut tail = Vec::new();

    for (kind, token) in types.iter().zip(tokens) {
        if kind.is_dynamic() {
            head.extend(uint_word((types.len() * WORD + tail.len()) as u128));
            tail.extend(encode_dynamic(kind, token)?);
        } else {
            head.extend(encode_static(kind, token)?);
        }
    }

    head.extend(tail);
    Ok(head)
}

fn mismatch(kind: &ParamType, token: &Token) -> AbiError {
    AbiError::TypeMismatch {
        expected: kind.name(),
        got: token.type_name(),
    }
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn encode_static(kind: &ParamType, token: &Token) -> AbiResult<[u8; WORD]> {
    match (kind, token) {
        (ParamType::Address, Token::Address(addr)) => {
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(addr.as_bytes());
            Ok(word)
        }
        (ParamType::Bool, Token::Bool(b)) => Ok(uint_word(*b as u128)),
        (ParamType::Uint(bits), Token::Uint(value)) => {
            if *bits < 128 && *value >> bits != 0 {
                return Err(AbiError::Overflow(kind.name()));
            }
            Ok(uint_word(*value))
        }
        _ => Err(mismatch(kind, token)),
    }
}

fn encode_dynamic(kind: &ParamType, token: &Token) -> AbiResult<Vec<u8>> {
    let bytes = match (kind, token) {
        (ParamType::String, Token::String(s)) => s.as_bytes(),
        (ParamType::Bytes, Token::Bytes(b)) => b.as_slice(),
        _ => return Err(mismatch(kind, token)),
    };

    let padded = bytes.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(WORD + padded);
    out.extend(uint_word(bytes.len() as u128));
    out.extend_from_slice(bytes);
    out.resize(WORD + padded, 0);
    Ok(out)
}

fn word_at(data: &[u8], offset: usize) -> AbiResult<&[u8]> {
    data.get(offset..offset.checked_add(WORD).ok_or(AbiError::Truncated)?)
        .ok_or(AbiError::Truncated)
}

fn read_usize(data: &[u8], offset: usize) -> AbiResult<usize> {
    let word = word_at(data, offset)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::Truncated);
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(buf)).map_err(|_| AbiError::Truncated)
}

/// Decode return data laid out for `types`.
pub fn decode(types: &[ParamType], data: &[u8]) -> AbiResult<Vec<Token>> {
    types
        .iter()
        .enumerate()
        .map(|(i, kind)| decode_one(kind, data, i * WORD))
        .collect()
}

fn decode_one(kind: &ParamType, data: &[u8], head: usize) -> AbiResult<Token> {
    match kind {
        ParamType::Address => {
            let word = word_at(data, head)?;
            Ok(Token::Address(
                Address::from_slice(&word[12..]).map_err(|_| AbiError::Truncated)?,
            ))
        }
        ParamType::Bool => Ok(Token::Bool(word_at(data, head)?[WORD - 1] != 0)),
        ParamType::Uint(_) => {
            let word = word_at(data, head)?;
            if word[..16].iter().any(|b| *b != 0) {
                return Err(AbiError::Overflow(kind.name()));
            }
            let mut buf = [0u8; 16];
            buf.copy_from_slice(&word[16..]);
            Ok(Token::Uint(u128::from_be_bytes(buf)))
        }
        ParamType::String | ParamType::Bytes => {
            let offset = read_usize(data, head)?;
            let len = read_usize(data, offset)?;
            let start = offset + WORD;
            let bytes = data
                .get(start..start.checked_add(len).ok_or(AbiError::Truncated)?)
                .ok_or(AbiError::Truncated)?
                .to_vec();
            if *kind == ParamType::String {
                String::from_utf8(bytes)
                    .map(Token::String)
                    .map_err(|_| AbiError::InvalidUtf8)
            } else {
                Ok(Token::Bytes(bytes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::STORAGE_ABI;

    fn storage() -> ContractInterface {
        ContractInterface::from_json(&serde_json::from_str(STORAGE_ABI).unwrap()).unwrap()
    }

    #[test]
    fn test_known_selector() {
        // transfer(address,uint256) is 0xa9059cbb on every EVM chain
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_interface_parsing() {
        let abi = storage();
        assert_eq!(abi.functions().len(), 3);

        let store = abi.function("storeKey", None).unwrap();
        assert_eq!(store.signature(), "storeKey(string,string)");
        assert!(!store.is_read_only());
        assert!(abi.function("retrieveKey", None).unwrap().is_read_only());
        assert!(matches!(
            abi.function("missing", None),
            Err(AbiError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_interface_from_json_string() {
        let abi = ContractInterface::from_json(&serde_json::Value::String(STORAGE_ABI.to_string()))
            .unwrap();
        assert_eq!(abi, storage());
    }

    #[test]
    fn test_interface_rejects_garbage() {
        let err = ContractInterface::from_json(&serde_json::json!({"not": "an abi"})).unwrap_err();
        assert!(matches!(err, AbiError::InvalidInterface(_)));
    }

    #[test]
    fn test_encode_address_argument() {
        let account = Address::from_bytes([0x11; 20]);
        let data = storage()
            .encode_call("hasWritePrivilege", &[Token::Address(account)])
            .unwrap();

        assert_eq!(data.len(), 4 + 32);
        assert_eq!(&data[..4], &selector("hasWritePrivilege(address)"));
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..], account.as_bytes());
    }

    #[test]
    fn test_encode_two_strings_layout() {
        let data = storage()
            .encode_call(
                "storeKey",
                &[Token::String("id-1".into()), Token::String("k".into())],
            )
            .unwrap();
        let body = &data[4..];

        // two offsets, then two length-prefixed tails of one word each
        assert_eq!(body.len(), 32 * 6);
        assert_eq!(read_usize(body, 0).unwrap(), 64);
        assert_eq!(read_usize(body, 32).unwrap(), 128);
        assert_eq!(read_usize(body, 64).unwrap(), 4);
        assert_eq!(&body[96..100], b"id-1");
    }

    #[test]
    fn test_string_output_with_unicode() {
        let value = "cert: «Ωmega» #42, ok?";
        let encoded = encode(&[ParamType::String], &[Token::String(value.into())]).unwrap();
        let decoded = storage().decode_output("retrieveKey", &encoded).unwrap();
        assert_eq!(decoded, vec![Token::String(value.into())]);
    }

    #[test]
    fn test_bool_output() {
        let encoded = encode(&[ParamType::Bool], &[Token::Bool(true)]).unwrap();
        let decoded = storage().decode_output("hasWritePrivilege", &encoded).unwrap();
        assert!(decoded[0].clone().into_bool().unwrap());
    }

    #[test]
    fn test_argument_checks() {
        let abi = storage();
        assert!(matches!(
            abi.encode_call("storeKey", &[Token::String("only one".into())]),
            Err(AbiError::ArgumentCount { expected: 2, got: 1, .. })
        ));
        assert!(matches!(
            abi.encode_call("hasWritePrivilege", &[Token::Bool(true)]),
            Err(AbiError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_uint_width_is_enforced() {
        assert_eq!(ParamType::parse("uint8").unwrap(), ParamType::Uint(8));
        assert_eq!(ParamType::parse("uint").unwrap(), ParamType::Uint(256));
        assert!(ParamType::parse("uint7").is_err());
        assert!(ParamType::parse("int256").is_err());

        assert!(encode(&[ParamType::Uint(8)], &[Token::Uint(255)]).is_ok());
        assert!(matches!(
            encode(&[ParamType::Uint(8)], &[Token::Uint(256)]),
            Err(AbiError::Overflow(_))
        ));
    }

    #[test]
    fn test_truncated_output() {
        let encoded = encode(&[ParamType::String], &[Token::String("abc".into())]).unwrap();
        assert_eq!(
            decode(&[ParamType::String], &encoded[..40]),
            Err(AbiError::Truncated)
        );
        assert_eq!(decode(&[ParamType::Bool], &[]), Err(AbiError::Truncated));
    }

    #[test]
    fn test_constructor_without_inputs() {
        assert!(storage().encode_constructor(&[]).unwrap().is_empty());
    }
}
