//! Configuration model: networks and nodes loaded once at startup,
//! immutable thereafter.
//!
//! [`Config::load`] accepts a path to a YAML file. If the file has no
//! `version` key it is a legacy (pre-V1) file: it is migrated in
//! place (backed up, then rewritten into the V1 layout) before
//! loading continues.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
    sync::Arc,
};

use ciborium::Value as CborValue;
use provisioning_crypto::FactoryKey;
use provisioning_proto::Method;
use serde::Deserialize;

use crate::{env::Environment, error::ConfigError};

/// Role values allowed by the DualMCU API node role field.
const ALLOWED_ROLES: [u8; 10] = [0x01, 0x02, 0x03, 0x11, 0x12, 0x13, 0x82, 0x83, 0x92, 0x93];

/// An immutable network record: address, channel, and the pair of
/// 16-byte keys shared by every node on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    /// Stable handle, frozen after load.
    pub name: String,
    /// Optional 24-bit network address.
    pub address: Option<u32>,
    /// Optional channel number.
    pub channel: Option<u8>,
    /// 16-byte CMAC-AES authentication key.
    pub authentication_key: [u8; 16],
    /// 16-byte AES-CTR encryption key.
    pub encryption_key: [u8; 16],
}

/// An immutable node record: identity, provisioning method, and the
/// configuration bundle it will be sent.
#[derive(Debug, Clone)]
pub struct Node {
    /// Node unique identifier, 1..79 bytes, unique across the config.
    pub uid: Vec<u8>,
    /// Provisioning method this node was whitelisted for.
    pub method: Method,
    /// Factory key, present for `SECURED`/`EXTENDED`, absent for `UNSECURED`.
    pub factory_key: Option<FactoryKey>,
    /// Optional node address to allocate.
    pub node_id: Option<u32>,
    /// Optional DualMCU role byte.
    pub role: Option<u8>,
    /// User-specific CBOR entries, keyed by index in `128..=255`.
    pub user_specific: BTreeMap<u16, CborValue>,
    /// The network this node will be provisioned onto.
    pub network: Arc<Network>,
}

impl Node {
    /// Build the CBOR map sent as the DATA payload: the reserved system
    /// keys followed by the node's `user_specific` entries.
    #[must_use]
    #[allow(clippy::expect_used, reason = "writing CBOR to a Vec has no I/O to fail")]
    pub fn canonical_cbor(&self) -> Vec<u8> {
        let mut map: Vec<(CborValue, CborValue)> = vec![
            (
                CborValue::Integer(0.into()),
                CborValue::Bytes(self.network.encryption_key.to_vec()),
            ),
            (
                CborValue::Integer(1.into()),
                CborValue::Bytes(self.network.authentication_key.to_vec()),
            ),
        ];
        if let Some(address) = self.network.address {
            map.push((CborValue::Integer(2.into()), CborValue::Integer(i64::from(address).into())));
        }
        if let Some(channel) = self.network.channel {
            map.push((CborValue::Integer(3.into()), CborValue::Integer(i64::from(channel).into())));
        }
        if let Some(node_id) = self.node_id {
            map.push((CborValue::Integer(4.into()), CborValue::Integer(i64::from(node_id).into())));
        }
        if let Some(role) = self.role {
            map.push((CborValue::Integer(5.into()), CborValue::Bytes(vec![role])));
        }
        for (index, value) in &self.user_specific {
            map.push((CborValue::Integer(i64::from(*index).into()), value.clone()));
        }

        let mut buf = Vec::new();
        ciborium::into_writer(&CborValue::Map(map), &mut buf)
            .expect("encoding an in-memory CborValue cannot fail");
        buf
    }
}

/// The full, immutable whitelist: networks and nodes keyed by
/// canonical UID bytes.
#[derive(Debug, Clone)]
pub struct Config {
    networks: HashMap<String, Arc<Network>>,
    nodes_by_uid: HashMap<Vec<u8>, Arc<Node>>,
}

impl Config {
    /// Load and validate a configuration file, migrating it in place
    /// first if it predates the `version` key.
    pub fn load<E: Environment>(path: &Path, env: &E) -> Result<Self, ConfigError> {
        let raw_text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let value: serde_yaml::Value = serde_yaml::from_str(&raw_text)?;

        let value = match value.get("version") {
            None => migrate_legacy(path, value, env)?,
            Some(v) => {
                let version = v.as_i64().unwrap_or(-1);
                if version != 1 {
                    return Err(ConfigError::UnsupportedVersion(version));
                }
                value
            },
        };

        let raw: RawConfigV1 = serde_yaml::from_value(value)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfigV1) -> Result<Self, ConfigError> {
        let mut networks = HashMap::with_capacity(raw.networks.len());
        for (name, raw_net) in raw.networks {
            let auth_key = required_bytes(&raw_net.authentication_key, &name, "authentication_key")?;
            let enc_key = required_bytes(&raw_net.encryption_key, &name, "encryption_key")?;
            let authentication_key = fixed_16(&name, "authentication_key", &auth_key)?;
            let encryption_key = fixed_16(&name, "encryption_key", &enc_key)?;
            let address = raw_net.address.as_ref().and_then(value_to_int).map(|v| v as u32);
            let channel = raw_net.channel.as_ref().and_then(value_to_int).map(|v| v as u8);
            networks.insert(
                name.clone(),
                Arc::new(Network {
                    name,
                    address,
                    channel,
                    authentication_key,
                    encryption_key,
                }),
            );
        }

        let mut nodes_by_uid: HashMap<Vec<u8>, Arc<Node>> = HashMap::with_capacity(raw.nodes.len());
        let mut claimed: HashMap<Vec<u8>, String> = HashMap::new();
        for (name, raw_node) in raw.nodes {
            let network = networks
                .get(&raw_node.network)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownNetwork {
                    node: name.clone(),
                    network: raw_node.network.clone(),
                })?;

            let method = match raw_node.method {
                0 => Method::Unsecured,
                1 => Method::Secured,
                3 => Method::Extended,
                other => {
                    return Err(ConfigError::InvalidFieldValue {
                        node: name,
                        field: "method",
                        detail: format!("{other} is not 0, 1, or 3"),
                    });
                },
            };

            let uid = resolve_uid(&raw_node, &name)?;
            if uid.is_empty() || uid.len() > 79 {
                return Err(ConfigError::InvalidUidLength { node: name, actual: uid.len() });
            }

            let factory_key = match &raw_node.factory_key {
                Some(v) => {
                    let bytes = required_bytes(v, &name, "factory_key")?;
                    if bytes.len() != 32 {
                        return Err(ConfigError::InvalidKeyLength {
                            node: name,
                            field: "factory_key",
                            expected: 32,
                            actual: bytes.len(),
                        });
                    }
                    Some(FactoryKey::from_bytes(&bytes).unwrap_or_else(|_| {
                        unreachable!("length already validated to be 32 bytes")
                    }))
                },
                None => {
                    if method != Method::Unsecured {
                        return Err(ConfigError::MissingField { node: name, field: "factory_key" });
                    }
                    None
                },
            };

            let node_id = match &raw_node.node_id {
                Some(v) => {
                    let parsed = value_to_int(v).ok_or_else(|| ConfigError::InvalidFieldValue {
                        node: name.clone(),
                        field: "node_id",
                        detail: "not an integer".to_string(),
                    })?;
                    let in_low_range = (0x0000_0001..=0x7FFF_FFFF).contains(&parsed);
                    let in_high_range = (0x8100_0000..=0xFFFF_FFFD).contains(&parsed);
                    if !(in_low_range || in_high_range) {
                        return Err(ConfigError::InvalidNodeId {
                            node: name,
                            value: parsed as u32,
                        });
                    }
                    Some(parsed as u32)
                },
                None => None,
            };

            let role = match &raw_node.role {
                Some(v) => {
                    let bytes = required_bytes(v, &name, "role")?;
                    if bytes.len() != 1 {
                        return Err(ConfigError::InvalidKeyLength {
                            node: name,
                            field: "role",
                            expected: 1,
                            actual: bytes.len(),
                        });
                    }
                    let byte = bytes[0];
                    if !ALLOWED_ROLES.contains(&byte) {
                        return Err(ConfigError::InvalidRole { node: name, value: byte });
                    }
                    Some(byte)
                },
                None => None,
            };

            let mut user_specific = BTreeMap::new();
            for (index, value) in &raw_node.user_specific {
                if !(128..=255).contains(index) {
                    return Err(ConfigError::InvalidUserSpecificIndex {
                        node: name,
                        index: *index,
                    });
                }
                user_specific.insert(*index as u16, yaml_to_cbor(value));
            }

            if let Some(first) = claimed.insert(uid.clone(), name.clone()) {
                return Err(ConfigError::DuplicateUid { uid: hex_encode(&uid), first, second: name });
            }

            nodes_by_uid.insert(
                uid.clone(),
                Arc::new(Node {
                    uid,
                    method,
                    factory_key,
                    node_id,
                    role,
                    user_specific,
                    network,
                }),
            );
        }

        Ok(Self { networks, nodes_by_uid })
    }

    /// Look up a node by its canonical UID bytes.
    #[must_use]
    pub fn lookup(&self, uid: &[u8]) -> Option<&Arc<Node>> {
        self.nodes_by_uid.get(uid)
    }

    /// Look up a network by name.
    #[must_use]
    pub fn network(&self, name: &str) -> Option<&Arc<Network>> {
        self.networks.get(name)
    }

    /// Number of whitelisted nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes_by_uid.len()
    }
}

fn resolve_uid(raw: &RawNode, node_name: &str) -> Result<Vec<u8>, ConfigError> {
    if let Some(v) = &raw.uid {
        return required_bytes(v, node_name, "uid");
    }

    let auth_type = raw.authenticator_uid_type.as_ref().ok_or_else(|| ConfigError::MissingField {
        node: node_name.to_string(),
        field: "authenticator_uid_type",
    })?;
    let auth_uid = raw.authenticator_uid.as_ref().ok_or_else(|| ConfigError::MissingField {
        node: node_name.to_string(),
        field: "authenticator_uid",
    })?;
    let node_type = raw.node_uid_type.as_ref().ok_or_else(|| ConfigError::MissingField {
        node: node_name.to_string(),
        field: "node_uid_type",
    })?;
    let node_uid = raw.node_uid.as_ref().ok_or_else(|| ConfigError::MissingField {
        node: node_name.to_string(),
        field: "node_uid",
    })?;

    let auth_type_b = required_bytes(auth_type, node_name, "authenticator_uid_type")?;
    let auth_uid_b = required_bytes(auth_uid, node_name, "authenticator_uid")?;
    let node_type_b = required_bytes(node_type, node_name, "node_uid_type")?;
    let node_uid_b = required_bytes(node_uid, node_name, "node_uid")?;

    if auth_type_b.len() != 1 {
        return Err(ConfigError::InvalidKeyLength {
            node: node_name.to_string(),
            field: "authenticator_uid_type",
            expected: 1,
            actual: auth_type_b.len(),
        });
    }
    if node_type_b.len() != 1 {
        return Err(ConfigError::InvalidKeyLength {
            node: node_name.to_string(),
            field: "node_uid_type",
            expected: 1,
            actual: node_type_b.len(),
        });
    }
    if auth_uid_b.len() != 16 {
        return Err(ConfigError::InvalidKeyLength {
            node: node_name.to_string(),
            field: "authenticator_uid",
            expected: 16,
            actual: auth_uid_b.len(),
        });
    }
    if node_uid_b.len() != 16 {
        return Err(ConfigError::InvalidKeyLength {
            node: node_name.to_string(),
            field: "node_uid",
            expected: 16,
            actual: node_uid_b.len(),
        });
    }

    let mut out = Vec::with_capacity(34);
    out.extend(auth_type_b);
    out.extend(auth_uid_b);
    out.extend(node_type_b);
    out.extend(node_uid_b);
    Ok(out)
}

fn fixed_16(node: &str, field: &'static str, bytes: &[u8]) -> Result<[u8; 16], ConfigError> {
    if bytes.len() != 16 {
        return Err(ConfigError::InvalidKeyLength {
            node: node.to_string(),
            field,
            expected: 16,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn required_bytes(v: &serde_yaml::Value, node: &str, field: &'static str) -> Result<Vec<u8>, ConfigError> {
    value_to_bytes(v).ok_or_else(|| ConfigError::InvalidFieldValue {
        node: node.to_string(),
        field,
        detail: "not a hex string, UTF-8 string, or integer".to_string(),
    })
}

/// Hex strings with a leading `0x`/`0X` decode as hex; plain strings
/// are taken as UTF-8 bytes; integers encode as big-endian minimal
/// bytes.
fn value_to_bytes(v: &serde_yaml::Value) -> Option<Vec<u8>> {
    match v {
        serde_yaml::Value::String(s) => {
            if s.len() >= 2 && s.as_bytes()[0] == b'0' && (s.as_bytes()[1] | 0x20) == b'x' {
                hex::decode(&s[2..]).ok()
            } else {
                Some(s.as_bytes().to_vec())
            }
        },
        serde_yaml::Value::Number(n) => n.as_i64().map(int_to_be_bytes),
        _ => None,
    }
}

fn int_to_be_bytes(i: i64) -> Vec<u8> {
    if i == 0 {
        return vec![0];
    }
    let magnitude = i.unsigned_abs();
    let bits = 64 - magnitude.leading_zeros();
    let nbytes = (bits as usize).div_ceil(8).max(1);
    let full = magnitude.to_be_bytes();
    full[8 - nbytes..].to_vec()
}

/// Integers parse in any base conventional numeric literals support
/// (`0x`, `0o`, `0b` prefixes, else base 10).
fn value_to_int(v: &serde_yaml::Value) -> Option<i64> {
    match v {
        serde_yaml::Value::Number(n) => n.as_i64(),
        serde_yaml::Value::String(s) => parse_int_str(s),
        _ => None,
    }
}

fn parse_int_str(s: &str) -> Option<i64> {
    let (negative, rest) = s.strip_prefix('-').map_or((false, s), |r| (true, r));
    let value = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = rest.strip_prefix("0o").or_else(|| rest.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        rest.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

/// Convert a parsed YAML value into the CBOR value it represents, for
/// `user_specific` entries of any CBOR-encodable type.
fn yaml_to_cbor(v: &serde_yaml::Value) -> CborValue {
    match v {
        serde_yaml::Value::Null => CborValue::Null,
        serde_yaml::Value::Bool(b) => CborValue::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CborValue::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                CborValue::Integer(i128::from(u).into())
            } else {
                CborValue::Float(n.as_f64().unwrap_or_default())
            }
        },
        serde_yaml::Value::String(s) => CborValue::Text(s.clone()),
        serde_yaml::Value::Sequence(seq) => CborValue::Array(seq.iter().map(yaml_to_cbor).collect()),
        serde_yaml::Value::Mapping(map) => {
            CborValue::Map(map.iter().map(|(k, v)| (yaml_to_cbor(k), yaml_to_cbor(v))).collect())
        },
        serde_yaml::Value::Tagged(tagged) => yaml_to_cbor(&tagged.value),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Rewrite a legacy (pre-`version`) configuration file into the V1
/// layout, backing up the original first.
fn migrate_legacy<E: Environment>(
    path: &Path,
    value: serde_yaml::Value,
    env: &E,
) -> Result<serde_yaml::Value, ConfigError> {
    let backup_path = format!("{}-{}.backup", path.display(), env.wall_clock_secs());
    write_backup(&backup_path, &value)?;

    let mapping = value.as_mapping().cloned().unwrap_or_default();

    let mut dedup: HashMap<(Option<i64>, Option<i64>, Vec<u8>, Vec<u8>), String> = HashMap::new();
    let mut networks_out = serde_yaml::Mapping::new();
    let mut nodes_out = serde_yaml::Mapping::new();

    for (node_key, node_value) in mapping {
        let node_name = node_key.as_str().unwrap_or_default().to_string();
        let mut node_map = node_value.as_mapping().cloned().unwrap_or_default();

        let address = node_map
            .get("network_address")
            .and_then(value_to_int);
        let channel = node_map
            .get("network_channel")
            .and_then(value_to_int);
        let auth_key = node_map
            .get("authentication_key")
            .and_then(value_to_bytes)
            .ok_or_else(|| ConfigError::MissingField {
                node: node_name.clone(),
                field: "authentication_key",
            })?;
        let enc_key = node_map
            .get("encryption_key")
            .and_then(value_to_bytes)
            .ok_or_else(|| ConfigError::MissingField {
                node: node_name.clone(),
                field: "encryption_key",
            })?;

        let dedup_key = (address, channel, auth_key.clone(), enc_key.clone());
        let network_name = dedup.entry(dedup_key).or_insert_with(|| {
            let name = format!("network_{}", uuid::Uuid::new_v4());
            networks_out.insert(
                serde_yaml::Value::String(name.clone()),
                legacy_network_value(address, channel, &auth_key, &enc_key),
            );
            name
        });

        node_map.remove("network_address");
        node_map.remove("network_channel");
        node_map.remove("authentication_key");
        node_map.remove("encryption_key");
        node_map.insert(
            serde_yaml::Value::String("network".to_string()),
            serde_yaml::Value::String(network_name.clone()),
        );
        nodes_out.insert(serde_yaml::Value::String(node_name), serde_yaml::Value::Mapping(node_map));
    }

    let mut migrated = serde_yaml::Mapping::new();
    migrated.insert(serde_yaml::Value::String("version".to_string()), serde_yaml::Value::Number(1.into()));
    migrated.insert(serde_yaml::Value::String("networks".to_string()), serde_yaml::Value::Mapping(networks_out));
    migrated.insert(serde_yaml::Value::String("nodes".to_string()), serde_yaml::Value::Mapping(nodes_out));
    let migrated = serde_yaml::Value::Mapping(migrated);

    let rendered = serde_yaml::to_string(&migrated)?;
    let tmp_path = path.with_extension("tmp-migrate");
    fs::write(&tmp_path, rendered).map_err(|source| ConfigError::Io {
        path: tmp_path.display().to_string(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    Ok(migrated)
}

fn legacy_network_value(
    address: Option<i64>,
    channel: Option<i64>,
    auth_key: &[u8],
    enc_key: &[u8],
) -> serde_yaml::Value {
    let mut map = serde_yaml::Mapping::new();
    if let Some(address) = address {
        map.insert(serde_yaml::Value::String("address".to_string()), serde_yaml::Value::Number(address.into()));
    }
    if let Some(channel) = channel {
        map.insert(serde_yaml::Value::String("channel".to_string()), serde_yaml::Value::Number(channel.into()));
    }
    map.insert(
        serde_yaml::Value::String("authentication_key".to_string()),
        serde_yaml::Value::String(format!("0x{}", hex_encode(auth_key))),
    );
    map.insert(
        serde_yaml::Value::String("encryption_key".to_string()),
        serde_yaml::Value::String(format!("0x{}", hex_encode(enc_key))),
    );
    serde_yaml::Value::Mapping(map)
}

/// Write the pre-migration document to `backup_path`, refusing to
/// overwrite an existing file (`O_CREAT|O_EXCL` semantics).
fn write_backup(backup_path: &str, value: &serde_yaml::Value) -> Result<(), ConfigError> {
    use std::io::Write;

    let rendered = serde_yaml::to_string(value)?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(backup_path)
        .map_err(|_| ConfigError::BackupAlreadyExists(backup_path.to_string()))?;
    file.write_all(rendered.as_bytes()).map_err(|source| ConfigError::Io {
        path: backup_path.to_string(),
        source,
    })
}

#[derive(Debug, Deserialize)]
struct RawConfigV1 {
    #[serde(default)]
    networks: BTreeMap<String, RawNetwork>,
    #[serde(default)]
    nodes: BTreeMap<String, RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNetwork {
    address: Option<serde_yaml::Value>,
    channel: Option<serde_yaml::Value>,
    authentication_key: serde_yaml::Value,
    encryption_key: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    network: String,
    method: u8,
    uid: Option<serde_yaml::Value>,
    authenticator_uid_type: Option<serde_yaml::Value>,
    authenticator_uid: Option<serde_yaml::Value>,
    node_uid_type: Option<serde_yaml::Value>,
    node_uid: Option<serde_yaml::Value>,
    node_id: Option<serde_yaml::Value>,
    factory_key: Option<serde_yaml::Value>,
    role: Option<serde_yaml::Value>,
    #[serde(default)]
    user_specific: BTreeMap<i64, serde_yaml::Value>,
}
