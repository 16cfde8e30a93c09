//! Encoding and decoding of contract calls against a JSON ABI descriptor.
//!
//! The descriptor is supplied at runtime, so argument and return types are
//! resolved dynamically and checked before any bytes are produced.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use alloy::primitives::{Address, B256, Bytes, FixedBytes, I256, U256, keccak256};
use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_json_abi::{Event, Function, JsonAbi};

use crate::error::{Error, Result};

/// Size of a single ABI word.
const WORD: usize = 32;

/// A parsed contract interface.
#[derive(Debug, Clone)]
pub struct ContractDescriptor {
    abi: JsonAbi,
    fingerprint: B256,
}

/// A single decoded event field.
#[derive(Debug, Clone, PartialEq)]
pub struct EventField {
    pub name: String,
    pub indexed: bool,
    pub value: DynSolValue,
}

/// An event log decoded against the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub name: String,
    pub fields: Vec<EventField>,
}

impl DecodedEvent {
    pub fn field(&self, name: &str) -> Option<&DynSolValue> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.value)
    }
}

impl ContractDescriptor {
    /// Parses a JSON ABI document.
    pub fn parse(json: &str) -> Result<Self> {
        let abi: JsonAbi = serde_json::from_str(json)
            .map_err(|e| Error::InvalidArgument(format!("invalid ABI descriptor: {e}")))?;
        Ok(Self {
            abi,
            fingerprint: keccak256(json.as_bytes()),
        })
    }

    /// Hash of the descriptor text this interface was parsed from.
    pub fn fingerprint(&self) -> B256 {
        self.fingerprint
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.function(name).is_some()
    }

    fn function(&self, name: &str) -> Option<&Function> {
        self.abi.function(name).and_then(|overloads| overloads.first())
    }

    fn input_types(function: &Function) -> Result<Vec<DynSolType>> {
        function
            .inputs
            .iter()
            .map(|param| {
                DynSolType::parse(&param.selector_type()).map_err(|e| {
                    Error::Encoding(format!(
                        "unsupported type '{}' of {}.{}: {e}",
                        param.ty, function.name, param.name
                    ))
                })
            })
            .collect()
    }

    fn output_types(function: &Function) -> Result<Vec<DynSolType>> {
        function
            .outputs
            .iter()
            .map(|param| {
                DynSolType::parse(&param.selector_type()).map_err(|e| {
                    Error::Decoding(format!(
                        "unsupported return type '{}' of {}: {e}",
                        param.ty, function.name
                    ))
                })
            })
            .collect()
    }

    /// Encodes a call to `name` with typed arguments.
    pub fn encode(&self, name: &str, args: &[DynSolValue]) -> Result<Bytes> {
        let function = self
            .function(name)
            .ok_or_else(|| Error::Encoding(format!("function '{name}' not found in ABI")))?;
        let types = Self::input_types(function)?;
        if types.len() != args.len() {
            return Err(Error::Encoding(format!(
                "{name} expects {} arguments, got {}",
                types.len(),
                args.len()
            )));
        }
        for (i, (ty, arg)) in types.iter().zip(args).enumerate() {
            if !ty.matches(arg) {
                return Err(Error::Encoding(format!(
                    "argument {} of {name} must be {}, got {}",
                    i + 1,
                    ty.sol_type_name(),
                    arg.sol_type_name().unwrap_or_else(|| "unknown".into())
                )));
            }
        }

        let mut data = function.selector().to_vec();
        data.extend_from_slice(&DynSolValue::Tuple(args.to_vec()).abi_encode_params());
        log::trace!("Encoded {name}: 0x{}", hex::encode(&data));
        Ok(data.into())
    }

    /// Encodes a call to `name` from textual arguments, converting each one to its declared type.
    pub fn encode_str(&self, name: &str, args: &[&str]) -> Result<Bytes> {
        let function = self
            .function(name)
            .ok_or_else(|| Error::Encoding(format!("function '{name}' not found in ABI")))?;
        let types = Self::input_types(function)?;
        if types.len() != args.len() {
            return Err(Error::Encoding(format!(
                "{name} expects {} arguments, got {}",
                types.len(),
                args.len()
            )));
        }
        let values = types
            .iter()
            .zip(args)
            .enumerate()
            .map(|(i, (ty, arg))| {
                coerce(ty, arg).map_err(|e| {
                    Error::Encoding(format!("argument {} of {name}: {e}", i + 1))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.encode(name, &values)
    }

    /// Decodes the return data of `name`.
    pub fn decode(&self, name: &str, data: &[u8]) -> Result<Vec<DynSolValue>> {
        let function = self
            .function(name)
            .ok_or_else(|| Error::Decoding(format!("function '{name}' not found in ABI")))?;
        let types = Self::output_types(function)?;
        let minimum: usize = types.iter().map(head_size).sum();
        if data.len() < minimum {
            return Err(Error::Decoding(format!(
                "{name} returned {} bytes, at least {minimum} expected",
                data.len()
            )));
        }
        if types.is_empty() {
            return Ok(Vec::new());
        }

        match DynSolType::Tuple(types).abi_decode_params(data) {
            Ok(DynSolValue::Tuple(values)) => Ok(values),
            Ok(other) => Ok(vec![other]),
            Err(e) => Err(Error::Decoding(format!("invalid {name} return data: {e}"))),
        }
    }

    /// Decodes a log emitted by the contract. Returns `None` for events the
    /// descriptor does not declare.
    pub fn decode_log(&self, topics: &[B256], data: &[u8]) -> Result<Option<DecodedEvent>> {
        let Some(topic0) = topics.first() else {
            return Ok(None);
        };
        let Some(event) = self
            .abi
            .events()
            .find(|event| !event.anonymous && event.selector() == *topic0)
        else {
            return Ok(None);
        };
        decode_event(event, &topics[1..], data).map(Some)
    }
}

fn decode_event(event: &Event, topics: &[B256], data: &[u8]) -> Result<DecodedEvent> {
    let indexed_count = event.inputs.iter().filter(|param| param.indexed).count();
    if topics.len() != indexed_count {
        return Err(Error::Decoding(format!(
            "event {} expects {indexed_count} indexed topics, got {}",
            event.name,
            topics.len()
        )));
    }

    let mut body_types = Vec::new();
    for param in event.inputs.iter().filter(|param| !param.indexed) {
        let ty = DynSolType::parse(&param.selector_type()).map_err(|e| {
            Error::Decoding(format!("unsupported type '{}' in event {}: {e}", param.ty, event.name))
        })?;
        body_types.push(ty);
    }
    let mut body = if body_types.is_empty() {
        Vec::new()
    } else {
        match DynSolType::Tuple(body_types).abi_decode_params(data) {
            Ok(DynSolValue::Tuple(values)) => values,
            Ok(other) => vec![other],
            Err(e) => {
                return Err(Error::Decoding(format!(
                    "invalid data of event {}: {e}",
                    event.name
                )));
            }
        }
    }
    .into_iter();
    let mut topics = topics.iter();

    let mut fields = Vec::with_capacity(event.inputs.len());
    for param in &event.inputs {
        let value = if param.indexed {
            // Dynamic indexed values are stored as their keccak hash.
            let topic = topics.next().copied().unwrap_or_default();
            match DynSolType::parse(&param.selector_type()) {
                Ok(ty) if !ty.is_dynamic() => ty
                    .abi_decode(topic.as_slice())
                    .unwrap_or(DynSolValue::FixedBytes(topic, WORD)),
                _ => DynSolValue::FixedBytes(topic, WORD),
            }
        } else {
            body.next().ok_or_else(|| {
                Error::Decoding(format!("missing field {} in event {}", param.name, event.name))
            })?
        };
        fields.push(EventField {
            name: param.name.clone(),
            indexed: param.indexed,
            value,
        });
    }

    Ok(DecodedEvent {
        name: event.name.clone(),
        fields,
    })
}

/// Number of bytes a value of this type occupies in the head of an encoding.
pub fn head_size(ty: &DynSolType) -> usize {
    if ty.is_dynamic() {
        return WORD;
    }
    match ty {
        DynSolType::FixedArray(inner, len) => head_size(inner) * len,
        DynSolType::Tuple(types) => types.iter().map(head_size).sum(),
        _ => WORD,
    }
}

/// Converts a textual argument into a value of the given type.
///
/// Hex values accept an optional `0x` prefix, integers are decimal or `0x` hex,
/// and arrays are written as `[a,b,c]`.
pub fn coerce(ty: &DynSolType, raw: &str) -> Result<DynSolValue> {
    match ty {
        DynSolType::String => Ok(DynSolValue::String(raw.to_string())),
        DynSolType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(DynSolValue::Bool(true)),
            "false" | "0" => Ok(DynSolValue::Bool(false)),
            other => Err(Error::Encoding(format!("'{other}' is not a bool"))),
        },
        DynSolType::Address => raw
            .trim()
            .parse::<Address>()
            .map(DynSolValue::Address)
            .map_err(|e| Error::Encoding(format!("'{raw}' is not an address: {e}"))),
        DynSolType::FixedBytes(size) => {
            let bytes = decode_hex(raw)?;
            if bytes.len() != *size {
                return Err(Error::Encoding(format!(
                    "expected {size} bytes, got {} in '{raw}'",
                    bytes.len()
                )));
            }
            let mut word = [0u8; WORD];
            word[..*size].copy_from_slice(&bytes);
            Ok(DynSolValue::FixedBytes(FixedBytes::from(word), *size))
        }
        DynSolType::Bytes => decode_hex(raw).map(DynSolValue::Bytes),
        DynSolType::Uint(bits) => {
            let raw = raw.trim();
            let value = match raw.strip_prefix("0x") {
                Some(hex) => U256::from_str_radix(hex, 16),
                None => U256::from_str_radix(raw, 10),
            }
            .map_err(|e| Error::Encoding(format!("'{raw}' is not an unsigned integer: {e}")))?;
            if *bits < 256 && value >= U256::from(1u8) << *bits {
                return Err(Error::Encoding(format!("{raw} does not fit in uint{bits}")));
            }
            Ok(DynSolValue::Uint(value, *bits))
        }
        DynSolType::Int(bits) => {
            let raw = raw.trim();
            let value = raw
                .parse::<I256>()
                .map_err(|e| Error::Encoding(format!("'{raw}' is not an integer: {e}")))?;
            if *bits < 256 {
                let bound = I256::from_raw(U256::from(1u8) << (*bits - 1));
                if value >= bound || value < -bound {
                    return Err(Error::Encoding(format!("{raw} does not fit in int{bits}")));
                }
            }
            Ok(DynSolValue::Int(value, *bits))
        }
        DynSolType::Array(inner) => {
            let items = split_list(raw)?;
            items
                .into_iter()
                .map(|item| coerce(inner, item))
                .collect::<Result<Vec<_>>>()
                .map(DynSolValue::Array)
        }
        DynSolType::FixedArray(inner, len) => {
            let items = split_list(raw)?;
            if items.len() != *len {
                return Err(Error::Encoding(format!(
                    "expected {len} elements, got {}",
                    items.len()
                )));
            }
            items
                .into_iter()
                .map(|item| coerce(inner, item))
                .collect::<Result<Vec<_>>>()
                .map(DynSolValue::FixedArray)
        }
        other => Err(Error::Encoding(format!(
            "unsupported argument type {}",
            other.sol_type_name()
        ))),
    }
}

fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let raw = raw.trim();
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits).map_err(|e| Error::Encoding(format!("'{raw}' is not valid hex: {e}")))
}

fn split_list(raw: &str) -> Result<Vec<&str>> {
    let inner = raw
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| Error::Encoding(format!("array '{raw}' must be enclosed in brackets")))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(inner.split(',').map(str::trim).collect())
}

/// Process-wide cache of parsed descriptors keyed by contract address.
///
/// Entries are replaced when a different descriptor text is supplied for the
/// same address, and removed only through [`DescriptorCache::invalidate`].
#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: RwLock<HashMap<Address, Arc<ContractDescriptor>>>,
}

static GLOBAL_CACHE: LazyLock<DescriptorCache> = LazyLock::new(DescriptorCache::default);

impl DescriptorCache {
    pub fn global() -> &'static DescriptorCache {
        &GLOBAL_CACHE
    }

    /// Returns the cached descriptor of `contract`, parsing `json` when it is
    /// missing or was registered from a different text.
    pub fn get_or_parse(&self, contract: Address, json: &str) -> Result<Arc<ContractDescriptor>> {
        let fingerprint = keccak256(json.as_bytes());
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = entries.get(&contract) {
                if cached.fingerprint() == fingerprint {
                    return Ok(cached.clone());
                }
            }
        }

        let descriptor = Arc::new(ContractDescriptor::parse(json)?);
        log::debug!("Caching ABI descriptor 0x{fingerprint:x} for contract {contract}");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(contract, descriptor.clone());
        Ok(descriptor)
    }

    pub fn get(&self, contract: &Address) -> Option<Arc<ContractDescriptor>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(contract)
            .cloned()
    }

    /// Drops the descriptor of `contract`. Returns whether one was cached.
    pub fn invalidate(&self, contract: &Address) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(contract)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
