use crate::{FieldRef, FieldType, InterfaceRef, RecordHandle, Result, RuntimeError, MAX_DIMENSIONS};

/// One element of a field, tagged with its storage kind.
///
/// Hex fields use [`Scalar::ULong`]; the two differ only in how the codec renders them.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Char(i8),
    UChar(u8),
    Short(i16),
    UShort(u16),
    Bool(bool),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
    Int64(i64),
    UInt64(u64),
    Record(Option<RecordHandle>),
    RecordType(i64),
    Interface(Option<InterfaceRef>),
    RecordField(Option<FieldRef>),
}

impl Scalar {
    pub fn natural_type(&self) -> FieldType {
        match self {
            Scalar::String(_) => FieldType::String,
            Scalar::Char(_) => FieldType::Char,
            Scalar::UChar(_) => FieldType::UChar,
            Scalar::Short(_) => FieldType::Short,
            Scalar::UShort(_) => FieldType::UShort,
            Scalar::Bool(_) => FieldType::Bool,
            Scalar::Long(_) => FieldType::Long,
            Scalar::ULong(_) => FieldType::ULong,
            Scalar::Float(_) => FieldType::Float,
            Scalar::Double(_) => FieldType::Double,
            Scalar::Int64(_) => FieldType::Int64,
            Scalar::UInt64(_) => FieldType::UInt64,
            Scalar::Record(_) => FieldType::Record,
            Scalar::RecordType(_) => FieldType::RecordType,
            Scalar::Interface(_) => FieldType::Interface,
            Scalar::RecordField(_) => FieldType::RecordField,
        }
    }

    /// Lossless conversion to the storage form of `to`.
    ///
    /// Only widening conversions succeed; anything that could truncate, change
    /// sign or lose precision fails with `TypeMismatch`.
    pub fn convert(self, to: FieldType) -> Result<Scalar> {
        let from = self.natural_type();
        let converted = match (to, self) {
            (FieldType::String, Scalar::String(s)) => Some(Scalar::String(s)),
            (FieldType::Bool, Scalar::Bool(b)) => Some(Scalar::Bool(b)),
            (FieldType::Char, Scalar::Char(v)) => Some(Scalar::Char(v)),
            (FieldType::UChar, Scalar::UChar(v)) => Some(Scalar::UChar(v)),
            (FieldType::Short, s) => match s {
                Scalar::Char(v) => Some(Scalar::Short(v.into())),
                Scalar::UChar(v) => Some(Scalar::Short(v.into())),
                Scalar::Short(v) => Some(Scalar::Short(v)),
                _ => None,
            },
            (FieldType::UShort, s) => match s {
                Scalar::UChar(v) => Some(Scalar::UShort(v.into())),
                Scalar::UShort(v) => Some(Scalar::UShort(v)),
                _ => None,
            },
            (FieldType::Long | FieldType::Int64, s) => {
                let v = match s {
                    Scalar::Char(v) => Some(i64::from(v)),
                    Scalar::UChar(v) => Some(i64::from(v)),
                    Scalar::Short(v) => Some(i64::from(v)),
                    Scalar::UShort(v) => Some(i64::from(v)),
                    Scalar::Long(v) | Scalar::Int64(v) => Some(v),
                    _ => None,
                };
                v.map(|v| {
                    if to == FieldType::Long {
                        Scalar::Long(v)
                    } else {
                        Scalar::Int64(v)
                    }
                })
            }
            (FieldType::ULong | FieldType::Hex | FieldType::UInt64, s) => {
                let v = match s {
                    Scalar::UChar(v) => Some(u64::from(v)),
                    Scalar::UShort(v) => Some(u64::from(v)),
                    Scalar::ULong(v) | Scalar::UInt64(v) => Some(v),
                    _ => None,
                };
                v.map(|v| {
                    if to == FieldType::UInt64 {
                        Scalar::UInt64(v)
                    } else {
                        Scalar::ULong(v)
                    }
                })
            }
            (FieldType::Float, s) => match s {
                Scalar::Char(v) => Some(Scalar::Float(v.into())),
                Scalar::UChar(v) => Some(Scalar::Float(v.into())),
                Scalar::Short(v) => Some(Scalar::Float(v.into())),
                Scalar::UShort(v) => Some(Scalar::Float(v.into())),
                Scalar::Float(v) => Some(Scalar::Float(v)),
                _ => None,
            },
            (FieldType::Double, s) => match s {
                Scalar::Char(v) => Some(Scalar::Double(v.into())),
                Scalar::UChar(v) => Some(Scalar::Double(v.into())),
                Scalar::Short(v) => Some(Scalar::Double(v.into())),
                Scalar::UShort(v) => Some(Scalar::Double(v.into())),
                Scalar::Float(v) => Some(Scalar::Double(v.into())),
                Scalar::Double(v) => Some(Scalar::Double(v)),
                _ => None,
            },
            (FieldType::Record, Scalar::Record(r)) => Some(Scalar::Record(r)),
            (FieldType::RecordType, Scalar::RecordType(t)) => Some(Scalar::RecordType(t)),
            (FieldType::Interface, Scalar::Interface(i)) => Some(Scalar::Interface(i)),
            (FieldType::RecordField, Scalar::RecordField(f)) => Some(Scalar::RecordField(f)),
            _ => None,
        };
        converted.ok_or_else(|| {
            RuntimeError::TypeMismatch(format!("cannot convert {from} to {to} without loss"))
        })
    }

    /// Integer value of an integer-typed scalar, if it fits in `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Scalar::Char(v) => Some(v.into()),
            Scalar::UChar(v) => Some(v.into()),
            Scalar::Short(v) => Some(v.into()),
            Scalar::UShort(v) => Some(v.into()),
            Scalar::Long(v) | Scalar::Int64(v) => Some(v),
            Scalar::ULong(v) | Scalar::UInt64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Numeric value as `f64`, used by change-threshold tests.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Scalar::Float(v) => Some(v.into()),
            Scalar::Double(v) => Some(v),
            Scalar::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            Scalar::ULong(v) | Scalar::UInt64(v) => Some(v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }
}

/// Rust types that can be read from or written to a field.
pub trait FieldScalar: Sized {
    const FIELD_TYPE: FieldType;
    fn into_scalar(self) -> Scalar;
    fn from_scalar(scalar: Scalar) -> Option<Self>;
}

macro_rules! impl_field_scalar {
    ($ty:ty, $ft:ident, $variant:ident) => {
        impl FieldScalar for $ty {
            const FIELD_TYPE: FieldType = FieldType::$ft;
            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }
            fn from_scalar(scalar: Scalar) -> Option<Self> {
                match scalar {
                    Scalar::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_field_scalar!(String, String, String);
impl_field_scalar!(i8, Char, Char);
impl_field_scalar!(u8, UChar, UChar);
impl_field_scalar!(i16, Short, Short);
impl_field_scalar!(u16, UShort, UShort);
impl_field_scalar!(bool, Bool, Bool);
impl_field_scalar!(i64, Long, Long);
impl_field_scalar!(u64, ULong, ULong);
impl_field_scalar!(f32, Float, Float);
impl_field_scalar!(f64, Double, Double);
impl_field_scalar!(Option<RecordHandle>, Record, Record);
impl_field_scalar!(Option<InterfaceRef>, Interface, Interface);
impl_field_scalar!(Option<FieldRef>, RecordField, RecordField);

/// Flat row-major backing storage, one vector variant per storage kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    String(Vec<String>),
    Char(Vec<i8>),
    UChar(Vec<u8>),
    Short(Vec<i16>),
    UShort(Vec<u16>),
    Bool(Vec<bool>),
    Long(Vec<i64>),
    ULong(Vec<u64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Record(Vec<Option<RecordHandle>>),
    RecordType(Vec<i64>),
    Interface(Vec<Option<InterfaceRef>>),
    RecordField(Vec<Option<FieldRef>>),
}

macro_rules! map_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::String($v) => ArrayData::String($body),
            ArrayData::Char($v) => ArrayData::Char($body),
            ArrayData::UChar($v) => ArrayData::UChar($body),
            ArrayData::Short($v) => ArrayData::Short($body),
            ArrayData::UShort($v) => ArrayData::UShort($body),
            ArrayData::Bool($v) => ArrayData::Bool($body),
            ArrayData::Long($v) => ArrayData::Long($body),
            ArrayData::ULong($v) => ArrayData::ULong($body),
            ArrayData::Float($v) => ArrayData::Float($body),
            ArrayData::Double($v) => ArrayData::Double($body),
            ArrayData::Int64($v) => ArrayData::Int64($body),
            ArrayData::UInt64($v) => ArrayData::UInt64($body),
            ArrayData::Record($v) => ArrayData::Record($body),
            ArrayData::RecordType($v) => ArrayData::RecordType($body),
            ArrayData::Interface($v) => ArrayData::Interface($body),
            ArrayData::RecordField($v) => ArrayData::RecordField($body),
        }
    };
}

macro_rules! with_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::String($v) => $body,
            ArrayData::Char($v) => $body,
            ArrayData::UChar($v) => $body,
            ArrayData::Short($v) => $body,
            ArrayData::UShort($v) => $body,
            ArrayData::Bool($v) => $body,
            ArrayData::Long($v) => $body,
            ArrayData::ULong($v) => $body,
            ArrayData::Float($v) => $body,
            ArrayData::Double($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::UInt64($v) => $body,
            ArrayData::Record($v) => $body,
            ArrayData::RecordType($v) => $body,
            ArrayData::Interface($v) => $body,
            ArrayData::RecordField($v) => $body,
        }
    };
}

fn zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|e| RuntimeError::OutOfMemory(format!("allocating {len} elements: {e}")))?;
    v.resize(len, T::default());
    Ok(v)
}

fn strides(extents: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; extents.len()];
    for d in (0..extents.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * extents[d + 1];
    }
    strides
}

/// Copies the overlapping region of `old` (shaped `old_ext`) into a fresh
/// default-filled vector shaped `new_ext`.
fn relayout<T: Clone + Default>(old: &[T], old_ext: &[usize], new_ext: &[usize]) -> Result<Vec<T>> {
    let new_len = element_count(new_ext)?;
    let mut out = zeroed::<T>(new_len)?;
    let overlap: Vec<usize> = old_ext
        .iter()
        .zip(new_ext)
        .map(|(a, b)| (*a).min(*b))
        .collect();
    if overlap.iter().any(|&n| n == 0) && !overlap.is_empty() {
        return Ok(out);
    }
    let old_strides = strides(old_ext);
    let new_strides = strides(new_ext);
    let mut idx = vec![0usize; overlap.len()];
    loop {
        let src: usize = idx.iter().zip(&old_strides).map(|(i, s)| i * s).sum();
        let dst: usize = idx.iter().zip(&new_strides).map(|(i, s)| i * s).sum();
        if let (Some(from), Some(to)) = (old.get(src), out.get_mut(dst)) {
            *to = from.clone();
        }
        // odometer increment, last dimension fastest
        let mut d = overlap.len();
        loop {
            if d == 0 {
                return Ok(out);
            }
            d -= 1;
            idx[d] += 1;
            if idx[d] < overlap[d] {
                break;
            }
            idx[d] = 0;
        }
    }
}

/// Number of elements for a set of element extents; rank 0 holds one element.
pub fn element_count(extents: &[usize]) -> Result<usize> {
    extents.iter().try_fold(1usize, |acc, &n| {
        acc.checked_mul(n).ok_or_else(|| {
            RuntimeError::WouldExceedLimit(format!("array extents {extents:?} overflow"))
        })
    })
}

fn put<T>(v: &mut [T], index: usize, x: T) -> Result<()> {
    let len = v.len();
    let slot = v.get_mut(index).ok_or_else(|| {
        RuntimeError::IllegalArgument(format!("element index {index} out of range (len {len})"))
    })?;
    *slot = x;
    Ok(())
}

impl ArrayData {
    pub fn with_len(datatype: FieldType, len: usize) -> Result<Self> {
        Ok(match datatype {
            FieldType::String => ArrayData::String(zeroed(len)?),
            FieldType::Char => ArrayData::Char(zeroed(len)?),
            FieldType::UChar => ArrayData::UChar(zeroed(len)?),
            FieldType::Short => ArrayData::Short(zeroed(len)?),
            FieldType::UShort => ArrayData::UShort(zeroed(len)?),
            FieldType::Bool => ArrayData::Bool(zeroed(len)?),
            FieldType::Long => ArrayData::Long(zeroed(len)?),
            FieldType::ULong | FieldType::Hex => ArrayData::ULong(zeroed(len)?),
            FieldType::Float => ArrayData::Float(zeroed(len)?),
            FieldType::Double => ArrayData::Double(zeroed(len)?),
            FieldType::Int64 => ArrayData::Int64(zeroed(len)?),
            FieldType::UInt64 => ArrayData::UInt64(zeroed(len)?),
            FieldType::Record => ArrayData::Record(zeroed(len)?),
            FieldType::RecordType => ArrayData::RecordType(zeroed(len)?),
            FieldType::Interface => ArrayData::Interface(zeroed(len)?),
            FieldType::RecordField => ArrayData::RecordField(zeroed(len)?),
        })
    }

    pub fn len(&self) -> usize {
        with_data!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Scalar> {
        match self {
            ArrayData::String(v) => v.get(index).cloned().map(Scalar::String),
            ArrayData::Char(v) => v.get(index).copied().map(Scalar::Char),
            ArrayData::UChar(v) => v.get(index).copied().map(Scalar::UChar),
            ArrayData::Short(v) => v.get(index).copied().map(Scalar::Short),
            ArrayData::UShort(v) => v.get(index).copied().map(Scalar::UShort),
            ArrayData::Bool(v) => v.get(index).copied().map(Scalar::Bool),
            ArrayData::Long(v) => v.get(index).copied().map(Scalar::Long),
            ArrayData::ULong(v) => v.get(index).copied().map(Scalar::ULong),
            ArrayData::Float(v) => v.get(index).copied().map(Scalar::Float),
            ArrayData::Double(v) => v.get(index).copied().map(Scalar::Double),
            ArrayData::Int64(v) => v.get(index).copied().map(Scalar::Int64),
            ArrayData::UInt64(v) => v.get(index).copied().map(Scalar::UInt64),
            ArrayData::Record(v) => v.get(index).copied().map(Scalar::Record),
            ArrayData::RecordType(v) => v.get(index).copied().map(Scalar::RecordType),
            ArrayData::Interface(v) => v.get(index).cloned().map(Scalar::Interface),
            ArrayData::RecordField(v) => v.get(index).cloned().map(Scalar::RecordField),
        }
    }

    /// Stores an already-converted scalar; the variant must match the storage kind.
    pub fn set(&mut self, index: usize, value: Scalar) -> Result<()> {
        match (self, value) {
            (ArrayData::String(v), Scalar::String(x)) => put(v, index, x),
            (ArrayData::Char(v), Scalar::Char(x)) => put(v, index, x),
            (ArrayData::UChar(v), Scalar::UChar(x)) => put(v, index, x),
            (ArrayData::Short(v), Scalar::Short(x)) => put(v, index, x),
            (ArrayData::UShort(v), Scalar::UShort(x)) => put(v, index, x),
            (ArrayData::Bool(v), Scalar::Bool(x)) => put(v, index, x),
            (ArrayData::Long(v), Scalar::Long(x)) => put(v, index, x),
            (ArrayData::ULong(v), Scalar::ULong(x)) => put(v, index, x),
            (ArrayData::Float(v), Scalar::Float(x)) => put(v, index, x),
            (ArrayData::Double(v), Scalar::Double(x)) => put(v, index, x),
            (ArrayData::Int64(v), Scalar::Int64(x)) => put(v, index, x),
            (ArrayData::UInt64(v), Scalar::UInt64(x)) => put(v, index, x),
            (ArrayData::Record(v), Scalar::Record(x)) => put(v, index, x),
            (ArrayData::RecordType(v), Scalar::RecordType(x)) => put(v, index, x),
            (ArrayData::Interface(v), Scalar::Interface(x)) => put(v, index, x),
            (ArrayData::RecordField(v), Scalar::RecordField(x)) => put(v, index, x),
            (_, x) => Err(RuntimeError::TypeMismatch(format!(
                "{} element does not match array storage",
                x.natural_type()
            ))),
        }
    }

    fn relayout(&self, old_ext: &[usize], new_ext: &[usize]) -> Result<Self> {
        Ok(map_data!(self, v => relayout(v, old_ext, new_ext)?))
    }
}

/// Owned, typed, possibly multi-dimensional field value.
///
/// `extents` holds every declared dimension. For strings the last extent is the
/// maximum string length and does not count toward the number of elements.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    datatype: FieldType,
    extents: Vec<usize>,
    data: ArrayData,
}

impl FieldValue {
    pub fn new(datatype: FieldType, extents: Vec<usize>) -> Result<Self> {
        check_shape(datatype, &extents)?;
        let count = element_count(element_extents(datatype, &extents))?;
        let data = ArrayData::with_len(datatype, count)?;
        Ok(Self {
            datatype,
            extents,
            data,
        })
    }

    /// A rank-0 value (or a single string) holding `value`.
    pub fn from_scalar(datatype: FieldType, value: Scalar, max_string_length: usize) -> Result<Self> {
        let extents = if datatype == FieldType::String {
            vec![max_string_length]
        } else {
            Vec::new()
        };
        let mut v = Self::new(datatype, extents)?;
        v.set(0, value)?;
        Ok(v)
    }

    pub fn datatype(&self) -> FieldType {
        self.datatype
    }

    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    /// Extents that index elements (excludes a string's length dimension).
    pub fn element_extents(&self) -> &[usize] {
        element_extents(self.datatype, &self.extents)
    }

    pub fn element_count(&self) -> usize {
        self.data.len()
    }

    pub fn max_string_length(&self) -> Option<usize> {
        if self.datatype == FieldType::String {
            self.extents.last().copied()
        } else {
            None
        }
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Native element at a flat row-major index.
    pub fn get(&self, index: usize) -> Result<Scalar> {
        self.data.get(index).ok_or_else(|| {
            RuntimeError::IllegalArgument(format!(
                "element index {index} out of range (len {})",
                self.data.len()
            ))
        })
    }

    /// Borrowed string element, for string fields.
    pub fn str_at(&self, index: usize) -> Option<&str> {
        match &self.data {
            ArrayData::String(v) => v.get(index).map(String::as_str),
            _ => None,
        }
    }

    /// Element at `index` widened to `as_type`.
    pub fn get_as(&self, index: usize, as_type: FieldType) -> Result<Scalar> {
        self.get(index)?.convert(as_type)
    }

    /// Converts and stores `value`; on any error the stored value is unchanged.
    pub fn set(&mut self, index: usize, value: Scalar) -> Result<()> {
        let value = value.convert(self.datatype)?;
        if let (Scalar::String(s), Some(max)) = (&value, self.max_string_length()) {
            if s.len() > max {
                return Err(RuntimeError::WouldExceedLimit(format!(
                    "string of {} bytes exceeds maximum length {max}",
                    s.len()
                )));
            }
        }
        self.data.set(index, value)
    }

    pub fn read<T: FieldScalar>(&self) -> Result<T> {
        self.read_at(0)
    }

    pub fn read_at<T: FieldScalar>(&self, index: usize) -> Result<T> {
        let scalar = self.get_as(index, T::FIELD_TYPE)?;
        T::from_scalar(scalar).ok_or_else(|| {
            RuntimeError::TypeMismatch(format!("{} field read as {}", self.datatype, T::FIELD_TYPE))
        })
    }

    pub fn write<T: FieldScalar>(&mut self, value: T) -> Result<()> {
        self.set(0, value.into_scalar())
    }

    pub fn to_vec<T: FieldScalar>(&self) -> Result<Vec<T>> {
        (0..self.element_count()).map(|i| self.read_at(i)).collect()
    }

    /// Replaces every element. All values are converted before any is stored.
    pub fn write_all<T: FieldScalar>(&mut self, values: Vec<T>) -> Result<()> {
        if values.len() != self.element_count() {
            return Err(RuntimeError::IllegalArgument(format!(
                "expected {} elements, got {}",
                self.element_count(),
                values.len()
            )));
        }
        let mut staged = self.data.clone();
        for (i, v) in values.into_iter().enumerate() {
            let scalar = v.into_scalar().convert(self.datatype)?;
            if let (Scalar::String(s), Some(max)) = (&scalar, self.max_string_length()) {
                if s.len() > max {
                    return Err(RuntimeError::WouldExceedLimit(format!(
                        "string of {} bytes exceeds maximum length {max}",
                        s.len()
                    )));
                }
            }
            staged.set(i, scalar)?;
        }
        self.data = staged;
        Ok(())
    }

    /// Changes extents while keeping the rank, preserving the overlapping region.
    ///
    /// Growth zero-fills; shrinking a string length dimension truncates strings.
    pub fn resize(&mut self, new_extents: Vec<usize>) -> Result<()> {
        if new_extents.len() != self.extents.len() {
            return Err(RuntimeError::IllegalArgument(format!(
                "resize cannot change rank from {} to {}",
                self.extents.len(),
                new_extents.len()
            )));
        }
        check_shape(self.datatype, &new_extents)?;
        let old_el = element_extents(self.datatype, &self.extents).to_vec();
        let new_el = element_extents(self.datatype, &new_extents).to_vec();
        let mut data = if old_el == new_el {
            self.data.clone()
        } else {
            self.data.relayout(&old_el, &new_el)?
        };
        if let (ArrayData::String(strings), Some(&max)) = (&mut data, new_extents.last()) {
            for s in strings.iter_mut() {
                truncate_at_boundary(s, max);
            }
        }
        self.data = data;
        self.extents = new_extents;
        Ok(())
    }

    /// Replaces the shape entirely, discarding contents when the rank changes.
    pub fn reshape(&mut self, new_extents: Vec<usize>) -> Result<()> {
        if new_extents.len() == self.extents.len() {
            return self.resize(new_extents);
        }
        *self = FieldValue::new(self.datatype, new_extents)?;
        Ok(())
    }

    /// Records referenced by this value, in element order, duplicates included.
    pub fn references(&self) -> Vec<RecordHandle> {
        match &self.data {
            ArrayData::Record(v) => v.iter().flatten().copied().collect(),
            ArrayData::Interface(v) => v.iter().flatten().map(|i| i.record).collect(),
            ArrayData::RecordField(v) => v.iter().flatten().map(|f| f.record).collect(),
            _ => Vec::new(),
        }
    }

    /// Repoints references from `from` to `to`, or clears them when `to` is `None`.
    /// Returns the number of elements changed.
    pub fn replace_reference(&mut self, from: RecordHandle, to: Option<RecordHandle>) -> usize {
        let mut changed = 0;
        match &mut self.data {
            ArrayData::Record(v) => {
                for slot in v.iter_mut().filter(|s| **s == Some(from)) {
                    *slot = to;
                    changed += 1;
                }
            }
            ArrayData::Interface(v) => {
                for slot in v.iter_mut() {
                    match slot.take() {
                        Some(i) if i.record == from => {
                            *slot = to.map(|record| InterfaceRef {
                                record,
                                address_name: i.address_name,
                            });
                            changed += 1;
                        }
                        other => *slot = other,
                    }
                }
            }
            ArrayData::RecordField(v) => {
                for slot in v.iter_mut() {
                    match slot.take() {
                        Some(f) if f.record == from => {
                            *slot = to.map(|record| FieldRef {
                                record,
                                field_name: f.field_name,
                            });
                            changed += 1;
                        }
                        other => *slot = other,
                    }
                }
            }
            _ => {}
        }
        changed
    }
}

fn element_extents(datatype: FieldType, extents: &[usize]) -> &[usize] {
    if datatype == FieldType::String {
        &extents[..extents.len().saturating_sub(1)]
    } else {
        extents
    }
}

fn check_shape(datatype: FieldType, extents: &[usize]) -> Result<()> {
    if extents.len() > MAX_DIMENSIONS {
        return Err(RuntimeError::WouldExceedLimit(format!(
            "{} dimensions exceeds the maximum of {MAX_DIMENSIONS}",
            extents.len()
        )));
    }
    if datatype == FieldType::String && extents.is_empty() {
        return Err(RuntimeError::IllegalArgument(
            "string values need a length dimension".into(),
        ));
    }
    Ok(())
}

fn truncate_at_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widening_conversions() {
        assert_eq!(Scalar::Char(-3).convert(FieldType::Long).unwrap(), Scalar::Long(-3));
        assert_eq!(Scalar::Float(1.5).convert(FieldType::Double).unwrap(), Scalar::Double(1.5));
        assert_eq!(Scalar::UShort(7).convert(FieldType::Hex).unwrap(), Scalar::ULong(7));
        assert_eq!(Scalar::ULong(9).convert(FieldType::UInt64).unwrap(), Scalar::UInt64(9));
    }

    #[test]
    fn test_narrowing_is_rejected() {
        let err = Scalar::Double(1.0).convert(FieldType::Float).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TypeMismatch);
        assert!(Scalar::Long(1).convert(FieldType::Short).is_err());
        assert!(Scalar::Long(1).convert(FieldType::ULong).is_err());
        assert!(Scalar::Long(1).convert(FieldType::Double).is_err());
        assert!(Scalar::Bool(true).convert(FieldType::Long).is_err());
    }

    #[test]
    fn test_string_into_double_leaves_value() {
        let mut v = FieldValue::new(FieldType::Double, vec![]).unwrap();
        v.write(2.5f64).unwrap();
        let err = v.write(String::from("3.0")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TypeMismatch);
        assert_eq!(v.read::<f64>().unwrap(), 2.5);
    }

    #[test]
    fn test_hex_shares_ulong_storage() {
        let mut v = FieldValue::new(FieldType::Hex, vec![]).unwrap();
        v.write(0xdead_u64).unwrap();
        assert_eq!(v.read::<u64>().unwrap(), 0xdead);
        assert!(matches!(v.data(), ArrayData::ULong(_)));
    }

    #[test]
    fn test_string_length_limit() {
        let mut v = FieldValue::new(FieldType::String, vec![4]).unwrap();
        v.write(String::from("abcd")).unwrap();
        let err = v.write(String::from("abcde")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::WouldExceedLimit);
        assert_eq!(v.read::<String>().unwrap(), "abcd");
    }

    #[test]
    fn test_resize_grow_zero_fills_and_shrink_truncates() {
        let mut v = FieldValue::new(FieldType::Long, vec![3]).unwrap();
        v.write_all(vec![1i64, 2, 3]).unwrap();
        v.resize(vec![5]).unwrap();
        assert_eq!(v.to_vec::<i64>().unwrap(), vec![1, 2, 3, 0, 0]);
        v.resize(vec![2]).unwrap();
        assert_eq!(v.to_vec::<i64>().unwrap(), vec![1, 2]);
        v.resize(vec![0]).unwrap();
        assert_eq!(v.element_count(), 0);
    }

    #[test]
    fn test_resize_two_dimensional_keeps_overlap() {
        let mut v = FieldValue::new(FieldType::Double, vec![2, 2]).unwrap();
        v.write_all(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        v.resize(vec![2, 3]).unwrap();
        assert_eq!(
            v.to_vec::<f64>().unwrap(),
            vec![1.0, 2.0, 0.0, 3.0, 4.0, 0.0]
        );
    }

    #[test]
    fn test_resize_rejects_rank_change() {
        let mut v = FieldValue::new(FieldType::Long, vec![3]).unwrap();
        assert!(v.resize(vec![3, 1]).is_err());
        v.reshape(vec![3, 1]).unwrap();
        assert_eq!(v.rank(), 2);
    }

    #[test]
    fn test_write_all_is_atomic() {
        let mut v = FieldValue::new(FieldType::String, vec![2, 3]).unwrap();
        v.write_all(vec![String::from("ab"), String::from("cd")]).unwrap();
        let err = v
            .write_all(vec![String::from("x"), String::from("toolong")])
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::WouldExceedLimit);
        assert_eq!(v.to_vec::<String>().unwrap(), vec!["ab", "cd"]);
    }

    #[test]
    fn test_rank_limit() {
        let err = FieldValue::new(FieldType::Long, vec![1; 9]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::WouldExceedLimit);
    }

    #[test]
    fn test_replace_reference() {
        let a = RecordHandle { index: 1, generation: 0 };
        let b = RecordHandle { index: 2, generation: 0 };
        let mut v = FieldValue::new(FieldType::Record, vec![3]).unwrap();
        v.write_all(vec![Some(a), None, Some(a)]).unwrap();
        assert_eq!(v.references(), vec![a, a]);
        assert_eq!(v.replace_reference(a, Some(b)), 2);
        assert_eq!(v.references(), vec![b, b]);
        assert_eq!(v.replace_reference(b, None), 2);
        assert!(v.references().is_empty());
    }
}
