//! The C type lattice used by the struct/function descriptors and the marshalling layer.

use libffi::middle::Type as FfiType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CType {
    Void,
    Char,
    SChar,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    Pointer,
    /// `char*`, marshalled as a null-terminated byte buffer.
    StringPtr,
    Struct,
    Bool,
    SizeT,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
}

impl CType {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "void" => CType::Void,
            "char" => CType::Char,
            "schar" | "signed char" => CType::SChar,
            "uchar" | "unsigned char" => CType::UChar,
            "short" => CType::Short,
            "ushort" | "unsigned short" => CType::UShort,
            "int" => CType::Int,
            "uint" | "unsigned int" | "unsigned" => CType::UInt,
            "long" => CType::Long,
            "ulong" | "unsigned long" => CType::ULong,
            "longlong" | "long long" => CType::LongLong,
            "ulonglong" | "unsigned long long" => CType::ULongLong,
            "float" => CType::Float,
            "double" => CType::Double,
            "pointer" | "void*" => CType::Pointer,
            "string" | "char*" | "const char*" => CType::StringPtr,
            "struct" => CType::Struct,
            "bool" | "_Bool" => CType::Bool,
            "size_t" => CType::SizeT,
            "int8" | "int8_t" => CType::Int8,
            "int16" | "int16_t" => CType::Int16,
            "int32" | "int32_t" => CType::Int32,
            "int64" | "int64_t" => CType::Int64,
            "uint8" | "uint8_t" => CType::UInt8,
            "uint16" | "uint16_t" => CType::UInt16,
            "uint32" | "uint32_t" => CType::UInt32,
            "uint64" | "uint64_t" => CType::UInt64,
            _ => return None,
        })
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CType::Void => "void",
            CType::Char => "char",
            CType::SChar => "schar",
            CType::UChar => "uchar",
            CType::Short => "short",
            CType::UShort => "ushort",
            CType::Int => "int",
            CType::UInt => "uint",
            CType::Long => "long",
            CType::ULong => "ulong",
            CType::LongLong => "longlong",
            CType::ULongLong => "ulonglong",
            CType::Float => "float",
            CType::Double => "double",
            CType::Pointer => "pointer",
            CType::StringPtr => "string",
            CType::Struct => "struct",
            CType::Bool => "bool",
            CType::SizeT => "size_t",
            CType::Int8 => "int8",
            CType::Int16 => "int16",
            CType::Int32 => "int32",
            CType::Int64 => "int64",
            CType::UInt8 => "uint8",
            CType::UInt16 => "uint16",
            CType::UInt32 => "uint32",
            CType::UInt64 => "uint64",
        }
    }

    #[must_use]
    pub fn size(self) -> usize {
        match self {
            CType::Void => 0,
            CType::Char | CType::SChar | CType::UChar | CType::Bool | CType::Int8 | CType::UInt8 => 1,
            CType::Short | CType::UShort | CType::Int16 | CType::UInt16 => 2,
            CType::Int | CType::UInt | CType::Float | CType::Int32 | CType::UInt32 => 4,
            CType::Long
            | CType::ULong
            | CType::LongLong
            | CType::ULongLong
            | CType::Double
            | CType::Pointer
            | CType::StringPtr
            | CType::SizeT
            | CType::Int64
            | CType::UInt64 => 8,
            CType::Struct => 0,
        }
    }

    /// Maps to the `libffi` type descriptor used to build a `Cif`.
    #[must_use]
    pub fn to_ffi_type(self) -> FfiType {
        match self {
            CType::Void => FfiType::void(),
            CType::Char | CType::SChar | CType::Int8 => FfiType::i8(),
            CType::UChar | CType::Bool | CType::UInt8 => FfiType::u8(),
            CType::Short | CType::Int16 => FfiType::i16(),
            CType::UShort | CType::UInt16 => FfiType::u16(),
            CType::Int | CType::Int32 => FfiType::i32(),
            CType::UInt | CType::UInt32 => FfiType::u32(),
            CType::Long | CType::LongLong | CType::SizeT | CType::Int64 => FfiType::i64(),
            CType::ULong | CType::ULongLong | CType::UInt64 => FfiType::u64(),
            CType::Float => FfiType::f32(),
            CType::Double => FfiType::f64(),
            CType::Pointer | CType::StringPtr | CType::Struct => FfiType::pointer(),
        }
    }
}
