use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

pub fn dejsonify<'a, T>(json_str: &'a str) -> serde_json::Result<T>
where
    T: Deserialize<'a>,
{
    serde_json::from_str::<T>(json_str)
}

/// Serializes with object keys sorted recursively, so equal values always
/// produce byte-identical JSON. Seed derivation hashes this output.
pub fn jsonify<T>(obj: &T) -> String
where
    T: Serialize,
{
    let value = serde_json::to_value(obj).expect("to_value failed on serializable object");
    serde_json::to_string(&sort_keys(&value)).expect("to_string failed on serializable object")
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&obj[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        _ => value.clone(),
    }
}

pub fn compress_obj<T>(obj: &T) -> Result<Vec<u8>>
where
    T: Serialize,
{
    Ok(zstd::encode_all(jsonify(obj).as_bytes(), 0)?)
}

pub fn decompress_obj<T>(input: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    let decompressed = zstd::decode_all(input)?;
    Ok(serde_json::from_slice::<T>(&decompressed)?)
}
