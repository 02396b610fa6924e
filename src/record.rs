//! Security records
//!
//! A [`SecurityRecord`] is the bonding information of a single peer device. The records of every
//! known device are kept within the [`SecurityDatabase`] which loads and saves them through a
//! [`Storage`].
//!
//! A record is *paired* only after a pairing has successfully completed. A record is *pairing*
//! while a pairing handler exists for the device. A record is *temporary* until it is paired, a
//! temporary record is never persisted.

use crate::hci::LinkKeyType;
use crate::{AddressType, AddressWithType, BluetoothDeviceAddress, Error, Role, SecurityLevel};
use std::collections::{BTreeMap, HashMap};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The security record of a peer device
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SecurityRecord {
    pseudo_address: AddressWithType,
    pairing: bool,
    paired: bool,
    temporary: bool,
    /// The identity address distributed by the peer
    pub identity_address: Option<AddressWithType>,
    pub security_level: SecurityLevel,
    pub key_size: Option<u8>,
    /// The long term key generated by LE Secure Connections pairing
    pub ltk: Option<u128>,
    /// The legacy long term key distributed by this device
    pub local_ltk: Option<u128>,
    pub local_ediv: Option<u16>,
    pub local_rand: Option<u64>,
    pub remote_ltk: Option<u128>,
    pub remote_ediv: Option<u16>,
    pub remote_rand: Option<u64>,
    pub remote_irk: Option<u128>,
    pub remote_signature_key: Option<u128>,
    link_key: Option<([u8; 16], LinkKeyType)>,
}

impl SecurityRecord {
    pub fn new(pseudo_address: AddressWithType) -> Self {
        SecurityRecord {
            pseudo_address,
            pairing: false,
            paired: false,
            temporary: true,
            identity_address: None,
            security_level: SecurityLevel::NoSecurity,
            key_size: None,
            ltk: None,
            local_ltk: None,
            local_ediv: None,
            local_rand: None,
            remote_ltk: None,
            remote_ediv: None,
            remote_rand: None,
            remote_irk: None,
            remote_signature_key: None,
            link_key: None,
        }
    }

    /// Get the address the record was created with
    pub fn get_pseudo_address(&self) -> AddressWithType {
        self.pseudo_address
    }

    pub fn is_pairing(&self) -> bool {
        self.pairing
    }

    pub fn is_paired(&self) -> bool {
        self.paired
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    /// Check if the pairing of this record was protected against a man in the middle
    pub fn is_authenticated(&self) -> bool {
        self.security_level.is_authenticated() || matches!(self.link_key, Some((_, kt)) if kt.is_authenticated())
    }

    /// Mark the record as being paired
    pub(crate) fn set_pairing(&mut self) {
        self.pairing = true
    }

    /// Clear the pairing flag
    ///
    /// This does not affect whether the record is paired.
    pub fn cancel_pairing(&mut self) {
        self.pairing = false
    }

    /// Mark the record as paired
    ///
    /// This is done for a successful pairing. The record is no longer temporary.
    pub(crate) fn set_paired(&mut self) {
        self.pairing = false;
        self.paired = true;
        self.temporary = false;
    }

    pub fn get_link_key(&self) -> Option<&[u8; 16]> {
        self.link_key.as_ref().map(|(key, _)| key)
    }

    pub fn get_key_type(&self) -> Option<LinkKeyType> {
        self.link_key.map(|(_, key_type)| key_type)
    }

    /// Set the BR/EDR link key
    ///
    /// This marks the record as paired.
    pub fn set_link_key(&mut self, link_key: [u8; 16], key_type: LinkKeyType) {
        self.link_key = Some((link_key, key_type));

        if self.security_level < key_type.security_level() {
            self.security_level = key_type.security_level();
        }

        self.set_paired();
    }

    /// Get the key to encrypt the LE link with
    ///
    /// This returns the long term key with its EDIV and Rand. A LE Secure Connections key has an
    /// EDIV and Rand of zero. For a legacy bond the central uses the key distributed by the
    /// peripheral and the peripheral uses the key it distributed.
    pub fn get_le_encryption_key(&self, role: Role) -> Option<(u128, u16, u64)> {
        if let Some(ltk) = self.ltk {
            return Some((ltk, 0, 0));
        }

        match role {
            Role::Central => Some((self.remote_ltk?, self.remote_ediv?, self.remote_rand?)),
            Role::Peripheral => Some((self.local_ltk?, self.local_ediv?, self.local_rand?)),
        }
    }

    /// Check if `address` is this record's address or identity address
    pub fn has_address(&self, address: &AddressWithType) -> bool {
        self.pseudo_address == *address || self.identity_address.as_ref() == Some(address)
    }
}

/// A key-value store used for persisting the security records
///
/// Properties are grouped into sections, every record is a section named by the device address
/// and its address type.
pub trait Storage {
    fn get_property(&self, section: &str, key: &str) -> Option<String>;

    fn set_property(&mut self, section: &str, key: &str, value: String);

    fn remove_section(&mut self, section: &str);

    fn get_sections(&self) -> Vec<String>;
}

/// A `Storage` that keeps everything in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_property(&self, section: &str, key: &str) -> Option<String> {
        self.sections.get(section)?.get(key).cloned()
    }

    fn set_property(&mut self, section: &str, key: &str, value: String) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn remove_section(&mut self, section: &str) {
        self.sections.remove(section);
    }

    fn get_sections(&self) -> Vec<String> {
        self.sections.keys().cloned().collect()
    }
}

/// The section for the properties of the local device
pub const ADAPTER_SECTION: &str = "Adapter";

/// Key of the local identity resolving key within the adapter section
pub const LOCAL_IRK_KEY: &str = "LE_LOCAL_KEY_IRK";

/// Key of the local address within the adapter section
pub const LOCAL_ADDRESS_KEY: &str = "Address";

mod keys {
    pub const IDENTITY_ADDRESS: &str = "IdentityAddr";
    pub const IDENTITY_ADDRESS_TYPE: &str = "IdentityAddrType";
    pub const SECURITY_LEVEL: &str = "SecurityLevel";
    pub const KEY_SIZE: &str = "LE_KEY_SIZE";
    pub const SC_LTK: &str = "LE_KEY_LTK";
    pub const LOCAL_LTK: &str = "LE_KEY_LENC";
    pub const LOCAL_EDIV: &str = "LE_KEY_LENC_EDIV";
    pub const LOCAL_RAND: &str = "LE_KEY_LENC_RAND";
    pub const LTK: &str = "LE_KEY_PENC";
    pub const EDIV: &str = "LE_KEY_PENC_EDIV";
    pub const RAND: &str = "LE_KEY_PENC_RAND";
    pub const IRK: &str = "LE_KEY_PID";
    pub const CSRK: &str = "LE_KEY_PCSRK";
    pub const LINK_KEY: &str = "LinkKey";
    pub const LINK_KEY_TYPE: &str = "LinkKeyType";
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub(crate) fn from_hex<const N: usize>(s: &str) -> Result<[u8; N], Error> {
    if s.len() != N * 2 || !s.is_ascii() {
        return Err(Error::Storage("hex length"));
    }

    let mut ret = [0u8; N];

    for (byte, pair) in ret.iter_mut().zip(s.as_bytes().chunks(2)) {
        let pair = core::str::from_utf8(pair).map_err(|_| Error::Storage("hex"))?;

        *byte = u8::from_str_radix(pair, 16).map_err(|_| Error::Storage("hex"))?;
    }

    Ok(ret)
}

/// The section of a record is named by the address and the address type, `XX:XX:XX:XX:XX:XX/<type>`
fn section_name(address: &AddressWithType) -> String {
    format!("{}/{}", address.address, address.address_type.into_val())
}

fn parse_section_name(section: &str) -> Result<AddressWithType, Error> {
    let (address, address_type) = section.split_once('/').ok_or(Error::Storage("section"))?;

    let address = BluetoothDeviceAddress::try_from_str(address).map_err(|_| Error::Storage("address"))?;

    Ok(AddressWithType::new(address, parse_address_type(address_type)?))
}

fn address_type_str(address_type: AddressType) -> String {
    address_type.into_val().to_string()
}

fn parse_address_type(s: &str) -> Result<AddressType, Error> {
    s.parse::<u8>()
        .map_err(|_| Error::Storage("address type"))
        .and_then(AddressType::try_from_val)
}

/// The database of security records
#[derive(Debug, Default)]
pub struct SecurityDatabase {
    records: HashMap<AddressWithType, SecurityRecord>,
}

impl SecurityDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the record of `address`, creating a new record if one does not exist
    ///
    /// `address` is also matched against the identity address of the records.
    pub fn find_or_create(&mut self, address: AddressWithType) -> &mut SecurityRecord {
        let key = self
            .records
            .values()
            .find(|record| record.has_address(&address))
            .map(|record| record.get_pseudo_address())
            .unwrap_or(address);

        self.records.entry(key).or_insert_with(|| SecurityRecord::new(address))
    }

    pub fn find(&self, address: &AddressWithType) -> Option<&SecurityRecord> {
        self.records.get(address).or_else(|| {
            self.records
                .values()
                .find(|record| record.identity_address.as_ref() == Some(address))
        })
    }

    pub fn find_mut(&mut self, address: &AddressWithType) -> Option<&mut SecurityRecord> {
        let key = self
            .records
            .values()
            .find(|record| record.has_address(address))
            .map(|record| record.get_pseudo_address())?;

        self.records.get_mut(&key)
    }

    /// Find the record of a resolvable private address
    ///
    /// The address is resolved with the IRKs distributed by the peers.
    pub fn find_by_resolvable_address(&self, address: &BluetoothDeviceAddress) -> Option<&SecurityRecord> {
        // a resolvable private address has the two most significant bits set to 0b01
        if address.0[5] & 0xC0 != 0x40 {
            return None;
        }

        let hash = [address.0[0], address.0[1], address.0[2]];
        let prand = [address.0[3], address.0[4], address.0[5]];

        self.records.values().find(|record| {
            record
                .remote_irk
                .map(|irk| crate::toolbox::ah(irk, prand) == hash)
                .unwrap_or_default()
        })
    }

    pub fn remove(&mut self, address: &AddressWithType) -> Option<SecurityRecord> {
        let key = self
            .records
            .values()
            .find(|record| record.has_address(address))
            .map(|record| record.get_pseudo_address())?;

        self.records.remove(&key)
    }

    /// Remove the record of `address` if it is temporary
    pub fn remove_if_temporary(&mut self, address: &AddressWithType) {
        if let Some(true) = self.find(address).map(|record| record.is_temporary()) {
            self.remove(address);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecurityRecord> {
        self.records.values()
    }

    /// Load the records from `storage`
    ///
    /// A record that cannot be loaded is skipped.
    pub fn load_records_from_storage<S: Storage + ?Sized>(&mut self, storage: &S) {
        for section in storage.get_sections() {
            if section == ADAPTER_SECTION {
                continue;
            }

            match load_record(storage, &section) {
                Ok(record) => {
                    log::trace!("(SM) loaded record of {}", record.get_pseudo_address());

                    self.records.insert(record.get_pseudo_address(), record);
                }
                Err(e) => log::warn!("(SM) failed to load security record '{}': {}", section, e),
            }
        }
    }

    /// Save the records to `storage`
    ///
    /// Temporary records are not saved. The sections of records no longer within the database are
    /// removed from `storage`.
    pub fn save_records_to_storage<S: Storage + ?Sized>(&self, storage: &mut S) {
        let saved: Vec<String> = self
            .records
            .values()
            .filter(|record| !record.is_temporary())
            .map(|record| {
                save_record(storage, record);

                section_name(&record.get_pseudo_address())
            })
            .collect();

        for section in storage.get_sections() {
            if section != ADAPTER_SECTION && !saved.contains(&section) {
                storage.remove_section(&section)
            }
        }
    }
}

fn save_record<S: Storage + ?Sized>(storage: &mut S, record: &SecurityRecord) {
    let section = section_name(&record.get_pseudo_address());

    storage.set_property(
        &section,
        keys::SECURITY_LEVEL,
        record.security_level.into_val().to_string(),
    );

    if let Some(identity) = record.identity_address {
        storage.set_property(&section, keys::IDENTITY_ADDRESS, identity.address.to_string());
        storage.set_property(&section, keys::IDENTITY_ADDRESS_TYPE, address_type_str(identity.address_type));
    }

    if let Some(key_size) = record.key_size {
        storage.set_property(&section, keys::KEY_SIZE, key_size.to_string());
    }

    if let Some(ltk) = record.ltk {
        storage.set_property(&section, keys::SC_LTK, to_hex(&ltk.to_be_bytes()));
    }

    if let Some(ltk) = record.local_ltk {
        storage.set_property(&section, keys::LOCAL_LTK, to_hex(&ltk.to_be_bytes()));
    }

    if let Some(ediv) = record.local_ediv {
        storage.set_property(&section, keys::LOCAL_EDIV, ediv.to_string());
    }

    if let Some(rand) = record.local_rand {
        storage.set_property(&section, keys::LOCAL_RAND, rand.to_string());
    }

    if let Some(ltk) = record.remote_ltk {
        storage.set_property(&section, keys::LTK, to_hex(&ltk.to_be_bytes()));
    }

    if let Some(ediv) = record.remote_ediv {
        storage.set_property(&section, keys::EDIV, ediv.to_string());
    }

    if let Some(rand) = record.remote_rand {
        storage.set_property(&section, keys::RAND, rand.to_string());
    }

    if let Some(irk) = record.remote_irk {
        storage.set_property(&section, keys::IRK, to_hex(&irk.to_be_bytes()));
    }

    if let Some(csrk) = record.remote_signature_key {
        storage.set_property(&section, keys::CSRK, to_hex(&csrk.to_be_bytes()));
    }

    if let Some((link_key, key_type)) = &record.link_key {
        storage.set_property(&section, keys::LINK_KEY, to_hex(link_key));
        storage.set_property(&section, keys::LINK_KEY_TYPE, key_type.into_val().to_string());
    }
}

fn load_record<S: Storage + ?Sized>(storage: &S, section: &str) -> Result<SecurityRecord, Error> {
    let get = |key: &str| storage.get_property(section, key);

    let parse_u128 = |key: &str| -> Result<Option<u128>, Error> {
        get(key)
            .map(|v| from_hex::<16>(&v).map(<u128>::from_be_bytes))
            .transpose()
    };

    let mut record = SecurityRecord::new(parse_section_name(section)?);

    record.set_paired();

    if let Some(level) = get(keys::SECURITY_LEVEL) {
        record.security_level = level
            .parse::<u8>()
            .map_err(|_| Error::Storage("security level"))
            .and_then(SecurityLevel::try_from_val)?;
    }

    if let (Some(identity), Some(identity_type)) = (get(keys::IDENTITY_ADDRESS), get(keys::IDENTITY_ADDRESS_TYPE)) {
        let identity = BluetoothDeviceAddress::try_from_str(&identity).map_err(|_| Error::Storage("identity"))?;

        record.identity_address = Some(AddressWithType::new(identity, parse_address_type(&identity_type)?));
    }

    record.key_size = get(keys::KEY_SIZE)
        .map(|v| v.parse::<u8>().map_err(|_| Error::Storage("key size")))
        .transpose()?;

    let parse_ediv = |key: &str| -> Result<Option<u16>, Error> {
        get(key)
            .map(|v| v.parse::<u16>().map_err(|_| Error::Storage("ediv")))
            .transpose()
    };

    let parse_rand = |key: &str| -> Result<Option<u64>, Error> {
        get(key)
            .map(|v| v.parse::<u64>().map_err(|_| Error::Storage("rand")))
            .transpose()
    };

    record.ltk = parse_u128(keys::SC_LTK)?;

    record.local_ltk = parse_u128(keys::LOCAL_LTK)?;
    record.local_ediv = parse_ediv(keys::LOCAL_EDIV)?;
    record.local_rand = parse_rand(keys::LOCAL_RAND)?;

    record.remote_ltk = parse_u128(keys::LTK)?;
    record.remote_ediv = parse_ediv(keys::EDIV)?;
    record.remote_rand = parse_rand(keys::RAND)?;

    record.remote_irk = parse_u128(keys::IRK)?;

    record.remote_signature_key = parse_u128(keys::CSRK)?;

    if let (Some(link_key), Some(key_type)) = (get(keys::LINK_KEY), get(keys::LINK_KEY_TYPE)) {
        let link_key = from_hex::<16>(&link_key)?;

        let key_type = key_type
            .parse::<u8>()
            .map_err(|_| Error::Storage("link key type"))
            .and_then(LinkKeyType::try_from_val)?;

        record.link_key = Some((link_key, key_type));
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(last: u8) -> AddressWithType {
        AddressWithType::public(BluetoothDeviceAddress([last, 2, 3, 4, 5, 6]))
    }

    #[test]
    fn find_or_create_returns_the_same_record() {
        let mut database = SecurityDatabase::new();

        database.find_or_create(address(1)).set_pairing();

        assert!(database.find_or_create(address(1)).is_pairing());

        assert!(database.find(&address(2)).is_none());
    }

    #[test]
    fn identity_address_lookup() {
        let mut database = SecurityDatabase::new();

        let random = AddressWithType::random(BluetoothDeviceAddress([1, 1, 1, 1, 1, 0x41]));

        database.find_or_create(random).identity_address = Some(address(7));

        assert_eq!(Some(random), database.find(&address(7)).map(|r| r.get_pseudo_address()));

        assert_eq!(random, database.find_or_create(address(7)).get_pseudo_address());
    }

    #[test]
    fn link_key_marks_paired() {
        let mut record = SecurityRecord::new(address(1));

        record.set_pairing();

        record.set_link_key([3; 16], LinkKeyType::AuthenticatedCombinationP256);

        assert!(record.is_paired());
        assert!(!record.is_pairing());
        assert!(!record.is_temporary());
        assert!(record.is_authenticated());
    }

    #[test]
    fn only_paired_records_are_persisted() {
        let mut database = SecurityDatabase::new();

        database.find_or_create(address(1));

        let paired = database.find_or_create(address(2));

        paired.set_paired();
        paired.security_level = SecurityLevel::AuthenticatedSecureConnections;
        paired.key_size = Some(16);
        paired.ltk = Some(0x1112_1314_1516_1718_191a_1b1c_1d1e_1f20);
        paired.local_ltk = Some(0x2122_2324_2526_2728_292a_2b2c_2d2e_2f30);
        paired.local_ediv = Some(0x3132);
        paired.local_rand = Some(0x3334_3536_3738_393a);
        paired.remote_ltk = Some(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10);
        paired.remote_ediv = Some(0x4142);
        paired.remote_rand = Some(0x4344_4546_4748_494a);
        paired.remote_irk = Some(7);
        paired.identity_address = Some(AddressWithType::random(BluetoothDeviceAddress([9; 6])));
        paired.set_link_key([0xab; 16], LinkKeyType::AuthenticatedCombinationP256);

        let mut storage = MemoryStorage::new();

        database.save_records_to_storage(&mut storage);

        assert_eq!(vec!["06:05:04:03:02:02/0".to_string()], storage.get_sections());

        let mut loaded = SecurityDatabase::new();

        loaded.load_records_from_storage(&storage);

        assert_eq!(database.find(&address(2)), loaded.find(&address(2)));

        assert!(loaded.find(&address(1)).is_none());
    }

    #[test]
    fn public_and_random_records_are_stored_apart() {
        let mut database = SecurityDatabase::new();

        let bytes = BluetoothDeviceAddress([1, 2, 3, 4, 5, 0xc6]);

        let public = database.find_or_create(AddressWithType::public(bytes));
        public.set_paired();
        public.remote_irk = Some(1);

        let random = database.find_or_create(AddressWithType::random(bytes));
        random.set_paired();
        random.remote_irk = Some(2);

        let mut storage = MemoryStorage::new();

        database.save_records_to_storage(&mut storage);

        assert_eq!(2, storage.get_sections().len());

        let mut loaded = SecurityDatabase::new();

        loaded.load_records_from_storage(&storage);

        assert_eq!(
            Some(Some(1)),
            loaded.find(&AddressWithType::public(bytes)).map(|r| r.remote_irk)
        );
        assert_eq!(
            Some(Some(2)),
            loaded.find(&AddressWithType::random(bytes)).map(|r| r.remote_irk)
        );
    }

    #[test]
    fn le_encryption_key() {
        let mut record = SecurityRecord::new(address(1));

        assert_eq!(None, record.get_le_encryption_key(Role::Central));

        record.local_ltk = Some(1);
        record.local_ediv = Some(2);
        record.local_rand = Some(3);
        record.remote_ltk = Some(4);
        record.remote_ediv = Some(5);
        record.remote_rand = Some(6);

        assert_eq!(Some((4, 5, 6)), record.get_le_encryption_key(Role::Central));
        assert_eq!(Some((1, 2, 3)), record.get_le_encryption_key(Role::Peripheral));

        record.ltk = Some(7);

        assert_eq!(Some((7, 0, 0)), record.get_le_encryption_key(Role::Central));
        assert_eq!(Some((7, 0, 0)), record.get_le_encryption_key(Role::Peripheral));
    }

    #[test]
    fn removed_records_are_removed_from_storage() {
        let mut database = SecurityDatabase::new();

        database.find_or_create(address(3)).set_paired();

        let mut storage = MemoryStorage::new();

        storage.set_property(ADAPTER_SECTION, LOCAL_IRK_KEY, to_hex(&[1; 16]));

        database.save_records_to_storage(&mut storage);

        assert_eq!(2, storage.get_sections().len());

        database.remove(&address(3));

        database.save_records_to_storage(&mut storage);

        assert_eq!(vec![ADAPTER_SECTION.to_string()], storage.get_sections());
    }

    #[test]
    fn malformed_record_is_skipped() {
        let mut storage = MemoryStorage::new();

        storage.set_property("not an address/0", keys::SECURITY_LEVEL, "0".to_string());
        storage.set_property("01:02:03:04:05:06/0", keys::LTK, "xyz".to_string());
        storage.set_property("01:02:03:04:05:07/1", keys::SECURITY_LEVEL, "0".to_string());
        storage.set_property("01:02:03:04:05:08", keys::SECURITY_LEVEL, "0".to_string());
        storage.set_property("01:02:03:04:05:09/2", keys::SECURITY_LEVEL, "0".to_string());

        let mut database = SecurityDatabase::new();

        database.load_records_from_storage(&storage);

        assert_eq!(1, database.iter().count());
    }

    #[test]
    fn resolvable_private_address() {
        let mut database = SecurityDatabase::new();

        let irk = 0xec0234a3_57c8ad05_341010a6_0a397d9b;

        database.find_or_create(address(1)).remote_irk = Some(irk);

        // hash 0x0dfbaa with prand 0x708194, least significant byte first
        let rpa = BluetoothDeviceAddress([0xaa, 0xfb, 0x0d, 0x94, 0x81, 0x70]);

        assert_eq!(
            Some(address(1)),
            database.find_by_resolvable_address(&rpa).map(|r| r.get_pseudo_address())
        );

        let other = BluetoothDeviceAddress([0xab, 0xfb, 0x0d, 0x94, 0x81, 0x70]);

        assert!(database.find_by_resolvable_address(&other).is_none());
    }
}
