//! The register store: four 16-bit-word address spaces plus a typed
//! overlay that maps logical values onto 1-4 consecutive words.

use crate::error::{ProfileError, StoreError};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Addressable units per register space.
pub const SPACE_SIZE: usize = 0x1_0000;

/// One of the four independent Modbus address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterSpace {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl RegisterSpace {
    /// Coils and discrete inputs are addressed bit by bit, the register
    /// spaces word by word.
    #[must_use]
    pub const fn is_bit_addressed(self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }
}

impl fmt::Display for RegisterSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Coil => "Coil",
            Self::DiscreteInput => "DiscreteInput",
            Self::HoldingRegister => "HoldingRegister",
            Self::InputRegister => "InputRegister",
        };
        f.write_str(name)
    }
}

/// Logical data type of a typed register definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Float64,
    Boolean,
}

impl DataType {
    /// Number of 16-bit words occupied by a value of this type.
    #[must_use]
    pub const fn word_len(self) -> u16 {
        match self {
            Self::Uint16 | Self::Int16 | Self::Boolean => 1,
            Self::Uint32 | Self::Int32 | Self::Float32 => 2,
            Self::Float64 => 4,
        }
    }

    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
            Self::Uint32 => "uint32",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Boolean => "boolean",
        }
    }
}

/// A decoded logical register value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TypedValue {
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    F64(f64),
    Bool(bool),
}

impl TypedValue {
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::U16(_) => DataType::Uint16,
            Self::I16(_) => DataType::Int16,
            Self::U32(_) => DataType::Uint32,
            Self::I32(_) => DataType::Int32,
            Self::F32(_) => DataType::Float32,
            Self::F64(_) => DataType::Float64,
            Self::Bool(_) => DataType::Boolean,
        }
    }

    /// Encode into 1-4 words, most significant word first.
    #[must_use]
    pub fn encode_words(&self) -> Vec<u16> {
        match *self {
            Self::U16(v) => vec![v],
            Self::I16(v) => vec![v as u16],
            Self::Bool(v) => vec![u16::from(v)],
            Self::U32(v) => split_u32(v),
            Self::I32(v) => split_u32(v as u32),
            Self::F32(v) => split_u32(v.to_bits()),
            Self::F64(v) => {
                let bits = v.to_bits();
                vec![
                    (bits >> 48) as u16,
                    (bits >> 32) as u16,
                    (bits >> 16) as u16,
                    bits as u16,
                ]
            }
        }
    }

    /// Decode from the words produced by [`encode_words`](Self::encode_words).
    ///
    /// Returns `None` if the slice length does not match the type width.
    #[must_use]
    pub fn decode_words(data_type: DataType, words: &[u16]) -> Option<Self> {
        if words.len() != data_type.word_len() as usize {
            return None;
        }
        let value = match data_type {
            DataType::Uint16 => Self::U16(words[0]),
            DataType::Int16 => Self::I16(words[0] as i16),
            DataType::Boolean => Self::Bool(words[0] != 0),
            DataType::Uint32 => Self::U32(join_u32(words)),
            DataType::Int32 => Self::I32(join_u32(words) as i32),
            DataType::Float32 => Self::F32(f32::from_bits(join_u32(words))),
            DataType::Float64 => {
                let bits = (u64::from(words[0]) << 48)
                    | (u64::from(words[1]) << 32)
                    | (u64::from(words[2]) << 16)
                    | u64::from(words[3]);
                Self::F64(f64::from_bits(bits))
            }
        };
        Some(value)
    }
}

fn split_u32(v: u32) -> Vec<u16> {
    vec![(v >> 16) as u16, v as u16]
}

fn join_u32(words: &[u16]) -> u32 {
    (u32::from(words[0]) << 16) | u32::from(words[1])
}

/// A typed register definition: where a logical value lives.
///
/// A definition of width W occupies the addresses `[address, address + W)`
/// of its space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedRegister {
    pub space: RegisterSpace,
    pub address: u16,
    pub data_type: DataType,
}

impl TypedRegister {
    #[must_use]
    pub const fn word_len(&self) -> u16 {
        if self.space.is_bit_addressed() {
            1
        } else {
            self.data_type.word_len()
        }
    }
}

/// How undefined addresses behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BankMode {
    /// Only addresses covered by a definition are valid; raw words
    /// default to zero.
    #[default]
    Profile,
    /// Every address up to the space bound is valid; word spaces are
    /// pre-filled with the address itself, truncated to 16 bits.
    Wide,
}

/// Four independent address spaces plus the typed overlay.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    mode: BankMode,
    coils: Vec<u8>,
    discrete: Vec<u8>,
    holding: Vec<u16>,
    input: Vec<u16>,
    definitions: Vec<TypedRegister>,
    valid: HashMap<RegisterSpace, HashSet<u16>>,
}

impl RegisterBank {
    #[must_use]
    pub fn new(mode: BankMode) -> Self {
        let mut word_space = vec![0; SPACE_SIZE];
        if mode == BankMode::Wide {
            for (addr, word) in word_space.iter_mut().enumerate() {
                *word = addr as u16;
            }
        }
        Self {
            mode,
            coils: vec![0; SPACE_SIZE / 8],
            discrete: vec![0; SPACE_SIZE / 8],
            holding: word_space.clone(),
            input: word_space,
            definitions: Vec::new(),
            valid: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> BankMode {
        self.mode
    }

    #[must_use]
    pub fn definitions(&self) -> &[TypedRegister] {
        &self.definitions
    }

    /// Register a typed definition and store its initial value.
    ///
    /// Overlapping definitions within one space are a load-time error.
    pub fn define(
        &mut self,
        register: TypedRegister,
        value: TypedValue,
    ) -> Result<(), ProfileError> {
        let TypedRegister { space, address, .. } = register;
        if register.space.is_bit_addressed() && register.data_type != DataType::Boolean {
            return Err(ProfileError::ValueType {
                space,
                address,
                data_type: register.data_type.name(),
            });
        }
        if value.data_type() != register.data_type {
            return Err(ProfileError::ValueType {
                space,
                address,
                data_type: register.data_type.name(),
            });
        }
        let width = register.word_len();
        if usize::from(address) + usize::from(width) > SPACE_SIZE {
            return Err(ProfileError::OutOfBounds { space, address });
        }
        let set = self.valid.entry(space).or_default();
        for addr in u32::from(address)..u32::from(address) + u32::from(width) {
            if !set.insert(addr as u16) {
                return Err(ProfileError::Overlap {
                    space,
                    address: addr as u16,
                });
            }
        }
        self.definitions.push(register);
        self.write_typed(&register, value)
            .map_err(|_| ProfileError::OutOfBounds { space, address })?;
        Ok(())
    }

    /// Is a single address mapped in the given space?
    #[must_use]
    pub fn address_valid(&self, space: RegisterSpace, address: u16) -> bool {
        match self.mode {
            BankMode::Wide => true,
            BankMode::Profile => self
                .valid
                .get(&space)
                .is_some_and(|set| set.contains(&address)),
        }
    }

    /// Is the whole span `[start, start + count)` mapped?
    #[must_use]
    pub fn span_valid(&self, space: RegisterSpace, start: u16, count: u16) -> bool {
        if u32::from(start) + u32::from(count) > SPACE_SIZE as u32 {
            return false;
        }
        match self.mode {
            BankMode::Wide => true,
            BankMode::Profile => {
                let Some(set) = self.valid.get(&space) else {
                    return false;
                };
                (u32::from(start)..u32::from(start) + u32::from(count))
                    .all(|addr| set.contains(&(addr as u16)))
            }
        }
    }

    /// Find the definition whose span contains `address`, if any.
    ///
    /// This resolves reads that hit the middle of a wider value, e.g. the
    /// second word of a 32-bit register.
    #[must_use]
    pub fn definition_covering(
        &self,
        space: RegisterSpace,
        address: u16,
    ) -> Option<&TypedRegister> {
        self.definitions.iter().find(|def| {
            def.space == space
                && def.address <= address
                && u32::from(address) < u32::from(def.address) + u32::from(def.word_len())
        })
    }

    fn words(&self, space: RegisterSpace) -> Option<&[u16]> {
        match space {
            RegisterSpace::HoldingRegister => Some(&self.holding),
            RegisterSpace::InputRegister => Some(&self.input),
            _ => None,
        }
    }

    fn words_mut(&mut self, space: RegisterSpace) -> Option<&mut [u16]> {
        match space {
            RegisterSpace::HoldingRegister => Some(&mut self.holding),
            RegisterSpace::InputRegister => Some(&mut self.input),
            _ => None,
        }
    }

    fn bits(&self, space: RegisterSpace) -> Option<&[u8]> {
        match space {
            RegisterSpace::Coil => Some(&self.coils),
            RegisterSpace::DiscreteInput => Some(&self.discrete),
            _ => None,
        }
    }

    fn bits_mut(&mut self, space: RegisterSpace) -> Option<&mut [u8]> {
        match space {
            RegisterSpace::Coil => Some(&mut self.coils),
            RegisterSpace::DiscreteInput => Some(&mut self.discrete),
            _ => None,
        }
    }

    const fn out_of_range(space: RegisterSpace, address: u16) -> StoreError {
        StoreError::OutOfRange { space, address }
    }

    /// Read `count` raw words starting at `start`.
    pub fn read_words(
        &self,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, StoreError> {
        if !self.span_valid(space, start, count) {
            return Err(Self::out_of_range(space, start));
        }
        let words = self
            .words(space)
            .ok_or(Self::out_of_range(space, start))?;
        let start = usize::from(start);
        Ok(words[start..start + usize::from(count)].to_vec())
    }

    /// Read `count` bits starting at `start`.
    pub fn read_bits(
        &self,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>, StoreError> {
        if !self.span_valid(space, start, count) {
            return Err(Self::out_of_range(space, start));
        }
        let bits = self.bits(space).ok_or(Self::out_of_range(space, start))?;
        let start = usize::from(start);
        Ok((start..start + usize::from(count))
            .map(|addr| (bits[addr / 8] >> (addr % 8)) & 0b1 > 0)
            .collect())
    }

    /// Write a single raw word.
    pub fn write_word(
        &mut self,
        space: RegisterSpace,
        address: u16,
        word: u16,
    ) -> Result<(), StoreError> {
        if !self.address_valid(space, address) {
            return Err(Self::out_of_range(space, address));
        }
        let words = self
            .words_mut(space)
            .ok_or(Self::out_of_range(space, address))?;
        words[usize::from(address)] = word;
        Ok(())
    }

    /// Write a single bit, packed into byte `address / 8`, bit `address % 8`.
    pub fn write_bit(
        &mut self,
        space: RegisterSpace,
        address: u16,
        value: bool,
    ) -> Result<(), StoreError> {
        if !self.address_valid(space, address) {
            return Err(Self::out_of_range(space, address));
        }
        let bits = self
            .bits_mut(space)
            .ok_or(Self::out_of_range(space, address))?;
        let byte = &mut bits[usize::from(address) / 8];
        let mask = 1 << (address % 8);
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
        Ok(())
    }

    /// Decode the logical value stored behind a definition.
    pub fn read_typed(&self, register: &TypedRegister) -> Result<TypedValue, StoreError> {
        if register.space.is_bit_addressed() {
            let bit = self.read_bits(register.space, register.address, 1)?;
            return Ok(TypedValue::Bool(bit[0]));
        }
        let words = self.read_words(register.space, register.address, register.word_len())?;
        TypedValue::decode_words(register.data_type, &words)
            .ok_or(StoreError::TypeMismatch(register.data_type.name()))
    }

    /// Encode a logical value into the raw space behind a definition.
    pub fn write_typed(
        &mut self,
        register: &TypedRegister,
        value: TypedValue,
    ) -> Result<(), StoreError> {
        if value.data_type() != register.data_type {
            return Err(StoreError::TypeMismatch(register.data_type.name()));
        }
        if register.space.is_bit_addressed() {
            let TypedValue::Bool(bit) = value else {
                return Err(StoreError::TypeMismatch(register.data_type.name()));
            };
            return self.write_bit(register.space, register.address, bit);
        }
        let address = usize::from(register.address);
        if address + usize::from(register.word_len()) > SPACE_SIZE {
            return Err(Self::out_of_range(register.space, register.address));
        }
        for (offset, word) in value.encode_words().into_iter().enumerate() {
            self.write_word(register.space, register.address + offset as u16, word)?;
        }
        Ok(())
    }
}
