// Network Parameters
// ==================
//
// This module defines the per-network values the envelope codec consumes: the
// format descriptor selecting which optional sections a network's records
// carry, the proof-of-work hash selector, and the difficulty limits.
//
// Networks are collected into an immutable `NetworkRegistry` value that is built
// once and passed by reference to whatever needs it.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use crypto_bigint::U256;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::difficulty::{big_to_u256, compact_to_big, AsertAnchor, AsertParams};
use crate::error::{EnvelopeError, Result};
use crate::hashes::HashAlgorithm;

/// The family of wire format a network uses for its transactions and headers.
#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    /// Plain Bitcoin layout.
    Standard,
    /// Proof-of-stake: a 32-bit timestamp follows the transaction version.
    PosTimestamped,
    /// Merge-mined: headers carry an AuxPow trailer when the version bit is set.
    AuxPow,
    /// Special transactions: a type tag in the version and a payload trailer.
    SpecialPayload,
    /// Separate prefix and witness trees (Decred style).
    DualTree,
}

/// Width of the version field on the wire.
#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum VersionWidth {
    Bits16,
    Bits32,
}

/// Layout of the fixed block header fields.
#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HeaderLayout {
    /// The 80-byte Bitcoin header.
    Standard,
    /// Height, reserved words, 256-bit nonce and a var-length solution.
    Equihash,
}

/// Selects which optional sections a network's envelopes carry.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize,
)]
pub struct FormatDescriptor {
    pub kind: FormatKind,
    /// Whether the dummy-input / flag-byte witness section is understood.
    pub allows_witness: bool,
    pub version_width: VersionWidth,
    #[serde(default = "default_header_layout")]
    pub header_layout: HeaderLayout,
    /// ASERT retarget settings, for networks that use it.
    #[serde(default)]
    pub asert: Option<AsertParams>,
}

fn default_header_layout() -> HeaderLayout {
    HeaderLayout::Standard
}

impl FormatDescriptor {
    const fn base(kind: FormatKind, allows_witness: bool) -> Self {
        FormatDescriptor {
            kind,
            allows_witness,
            version_width: VersionWidth::Bits32,
            header_layout: HeaderLayout::Standard,
            asert: None,
        }
    }

    /// Bitcoin with segregated witness.
    pub const fn standard() -> Self {
        Self::base(FormatKind::Standard, true)
    }

    /// Bitcoin before segregated witness.
    pub const fn legacy() -> Self {
        Self::base(FormatKind::Standard, false)
    }

    pub const fn pos_timestamped(allows_witness: bool) -> Self {
        Self::base(FormatKind::PosTimestamped, allows_witness)
    }

    pub const fn aux_pow(allows_witness: bool) -> Self {
        Self::base(FormatKind::AuxPow, allows_witness)
    }

    pub const fn special_payload(version_width: VersionWidth) -> Self {
        FormatDescriptor {
            version_width,
            ..Self::base(FormatKind::SpecialPayload, false)
        }
    }

    pub const fn dual_tree(asert: Option<AsertParams>) -> Self {
        FormatDescriptor {
            asert,
            ..Self::base(FormatKind::DualTree, false)
        }
    }

    pub const fn equihash(allows_witness: bool) -> Self {
        FormatDescriptor {
            header_layout: HeaderLayout::Equihash,
            ..Self::base(FormatKind::Standard, allows_witness)
        }
    }

    pub fn has_pos_timestamp(&self) -> bool {
        self.kind == FormatKind::PosTimestamped
    }

    pub fn allows_special_payload(&self) -> bool {
        self.kind == FormatKind::SpecialPayload
    }

    pub fn is_aux_pow(&self) -> bool {
        self.kind == FormatKind::AuxPow
    }

    pub fn is_dual_tree(&self) -> bool {
        self.kind == FormatKind::DualTree
    }

    pub fn has_equihash_header(&self) -> bool {
        self.header_layout == HeaderLayout::Equihash
    }

    /// Rejects combinations the codec cannot express on the wire.
    pub fn validate(&self) -> Result<()> {
        if self.allows_witness && self.version_width == VersionWidth::Bits16 {
            // The no-dummy-input marker lives above bit 16.
            return Err(EnvelopeError::InvalidDescriptor(
                "witness support requires a 32-bit version",
            ));
        }
        if self.is_dual_tree() && self.allows_witness {
            return Err(EnvelopeError::InvalidDescriptor(
                "dual-tree transactions carry their own witness tree",
            ));
        }
        if self.version_width == VersionWidth::Bits16
            && !matches!(self.kind, FormatKind::Standard | FormatKind::SpecialPayload)
        {
            return Err(EnvelopeError::InvalidDescriptor(
                "16-bit versions are only defined for standard and special-payload formats",
            ));
        }
        if self.is_aux_pow() && self.has_equihash_header() {
            return Err(EnvelopeError::InvalidDescriptor(
                "AuxPow trailers follow the standard header layout",
            ));
        }
        if let Some(asert) = &self.asert {
            if !asert.is_valid() {
                return Err(EnvelopeError::InvalidDescriptor(
                    "ASERT spacing and half-life must be positive",
                ));
            }
        }
        Ok(())
    }
}

/// Stores the parameters for a specific network.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize,
)]
pub struct NetworkParams {
    /// Registry key, e.g. `"bitcoin"`.
    pub name: String,

    /// Message start bytes of the P2P protocol.
    #[serde(with = "hex_magic")]
    pub magic: [u8; 4],

    pub format: FormatDescriptor,

    /// Proof-of-work hash of the block header.
    pub pow_hash: HashAlgorithm,

    /// Maximum difficulty bits value (easiest allowed target, compact form).
    pub pow_limit_bits: u32,

    /// Ideal block spacing in seconds.
    pub target_spacing: u32,
}

impl NetworkParams {
    /// Maximum target value as a 256-bit integer.
    pub fn max_target(&self) -> U256 {
        big_to_u256(&self.pow_limit())
    }

    /// Maximum target value as an unsigned big integer.
    pub fn pow_limit(&self) -> BigUint {
        compact_to_big(self.pow_limit_bits)
            .to_biguint()
            .unwrap_or_default()
    }

    pub fn bitcoin() -> Self {
        NetworkParams {
            name: "bitcoin".to_string(),
            magic: [0xf9, 0xbe, 0xb4, 0xd9],
            format: FormatDescriptor::standard(),
            pow_hash: HashAlgorithm::DoubleSha256,
            pow_limit_bits: 0x1d00ffff,
            target_spacing: 600,
        }
    }

    pub fn bitcoin_regtest() -> Self {
        NetworkParams {
            name: "bitcoin-regtest".to_string(),
            magic: [0xfa, 0xbf, 0xb5, 0xda],
            pow_limit_bits: 0x207fffff,
            ..Self::bitcoin()
        }
    }

    pub fn namecoin() -> Self {
        NetworkParams {
            name: "namecoin".to_string(),
            magic: [0xf9, 0xbe, 0xb4, 0xfe],
            format: FormatDescriptor::aux_pow(true),
            pow_hash: HashAlgorithm::DoubleSha256,
            pow_limit_bits: 0x1d00ffff,
            target_spacing: 600,
        }
    }

    pub fn dogecoin() -> Self {
        NetworkParams {
            name: "dogecoin".to_string(),
            magic: [0xc0, 0xc0, 0xc0, 0xc0],
            format: FormatDescriptor::aux_pow(false),
            pow_hash: HashAlgorithm::Scrypt,
            pow_limit_bits: 0x1e0fffff,
            target_spacing: 60,
        }
    }

    pub fn peercoin() -> Self {
        NetworkParams {
            name: "peercoin".to_string(),
            magic: [0xe6, 0xe8, 0xe9, 0xe5],
            format: FormatDescriptor::pos_timestamped(false),
            pow_hash: HashAlgorithm::DoubleSha256,
            pow_limit_bits: 0x1d00ffff,
            target_spacing: 600,
        }
    }

    pub fn dash() -> Self {
        NetworkParams {
            name: "dash".to_string(),
            magic: [0xbf, 0x0c, 0x6b, 0xbd],
            format: FormatDescriptor::special_payload(VersionWidth::Bits16),
            pow_hash: HashAlgorithm::X11,
            pow_limit_bits: 0x1e0fffff,
            target_spacing: 150,
        }
    }

    pub fn bitcoin_gold() -> Self {
        NetworkParams {
            name: "bitcoin-gold".to_string(),
            magic: [0xe1, 0x47, 0x6d, 0x44],
            format: FormatDescriptor::equihash(true),
            pow_hash: HashAlgorithm::DoubleSha256,
            pow_limit_bits: 0x1d00ffff,
            target_spacing: 600,
        }
    }

    pub fn decred_testnet() -> Self {
        NetworkParams {
            name: "decred-testnet".to_string(),
            magic: [0x75, 0xaa, 0x94, 0xb1],
            format: FormatDescriptor::dual_tree(Some(AsertParams {
                target_secs_per_block: 120,
                half_life_secs: 720,
                anchor: AsertAnchor::ForcedActive,
            })),
            pow_hash: HashAlgorithm::Blake256,
            pow_limit_bits: 0x1e00ffff,
            target_spacing: 120,
        }
    }

    /// All networks bundled with the crate.
    pub fn presets() -> Vec<NetworkParams> {
        vec![
            Self::bitcoin(),
            Self::bitcoin_regtest(),
            Self::namecoin(),
            Self::dogecoin(),
            Self::peercoin(),
            Self::dash(),
            Self::bitcoin_gold(),
            Self::decred_testnet(),
        ]
    }
}

/// Name of the network returned by [`NetworkRegistry::default_network`].
///
/// This is determined at compile time from the `ENVELOPE_NETWORK` environment
/// variable and defaults to `"bitcoin"`.
pub const DEFAULT_NETWORK: &str = {
    match option_env!("ENVELOPE_NETWORK") {
        Some(network) => network,
        None => "bitcoin",
    }
};

/// Immutable collection of network parameters, keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkRegistry {
    networks: BTreeMap<String, NetworkParams>,
}

/// Collects networks before freezing them into a [`NetworkRegistry`].
#[derive(Debug, Default)]
pub struct NetworkRegistryBuilder {
    networks: BTreeMap<String, NetworkParams>,
}

impl NetworkRegistryBuilder {
    /// Adds a network, replacing any earlier one with the same name.
    pub fn register(mut self, params: NetworkParams) -> Result<Self> {
        params.format.validate()?;
        debug!(network = %params.name, kind = ?params.format.kind, "registering network");
        self.networks.insert(params.name.clone(), params);
        Ok(self)
    }

    pub fn with_presets(self) -> Result<Self> {
        NetworkParams::presets()
            .into_iter()
            .try_fold(self, |builder, params| builder.register(params))
    }

    pub fn build(self) -> NetworkRegistry {
        NetworkRegistry {
            networks: self.networks,
        }
    }
}

impl NetworkRegistry {
    pub fn builder() -> NetworkRegistryBuilder {
        NetworkRegistryBuilder::default()
    }

    /// A registry holding every bundled preset.
    pub fn with_presets() -> Result<Self> {
        Ok(Self::builder().with_presets()?.build())
    }

    /// Loads networks from a JSON array of [`NetworkParams`].
    pub fn from_json(json: &str) -> Result<Self> {
        let networks: Vec<NetworkParams> = serde_json::from_str(json)?;
        Ok(networks
            .into_iter()
            .try_fold(Self::builder(), |builder, params| builder.register(params))?
            .build())
    }

    pub fn to_json(&self) -> Result<String> {
        let networks: Vec<&NetworkParams> = self.networks.values().collect();
        Ok(serde_json::to_string_pretty(&networks)?)
    }

    pub fn get(&self, name: &str) -> Result<&NetworkParams> {
        self.networks
            .get(name)
            .ok_or_else(|| EnvelopeError::UnknownNetwork(name.to_string()))
    }

    /// Looks a network up by its P2P message start bytes.
    pub fn by_magic(&self, magic: [u8; 4]) -> Option<&NetworkParams> {
        self.networks.values().find(|params| params.magic == magic)
    }

    /// The network selected at compile time, see [`DEFAULT_NETWORK`].
    pub fn default_network(&self) -> Result<&NetworkParams> {
        self.get(DEFAULT_NETWORK)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.networks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

mod hex_magic {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(magic: &[u8; 4], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(magic))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 4], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("magic must be exactly 4 bytes"))
    }
}
