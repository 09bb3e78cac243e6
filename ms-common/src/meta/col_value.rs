/// Raw column value as learned from the wire.
///
/// Binlog row images carry compact encodings (integer ENUM index, SET
/// bitmask, undecoded bytes), while the snapshot path reads through the
/// query protocol and gets human-readable strings. Both shapes are kept
/// until normalization erases the seam.
#[derive(Clone, Debug, PartialEq)]
pub enum ColValue {
    None,
    Bool(bool),
    Tiny(i8),
    UnsignedTiny(u8),
    Short(i16),
    UnsignedShort(u16),
    Long(i32),
    UnsignedLong(u32),
    LongLong(i64),
    UnsignedLongLong(u64),
    Float(f32),
    Double(f64),
    Decimal(String),
    Time(String),
    Date(String),
    DateTime(String),
    Timestamp(String),
    Year(u16),
    String(String),
    RawString(Vec<u8>),
    Blob(Vec<u8>),
    Bit(u64),
    Set(u64),
    Set2(String),
    Enum(u32),
    Enum2(String),
    Json(Vec<u8>),
    Json2(String),
}

impl ColValue {
    pub fn is_none(&self) -> bool {
        matches!(self, ColValue::None)
    }
}
