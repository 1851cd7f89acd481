//! Generic foreign-call bridge: descriptor preparation, value marshalling, and the actual call.
//!
//! Built on `libffi`'s `middle` layer, which hides `ffi_cif`/`ffi_type` construction behind safe
//! wrappers while still letting us describe an arbitrary C signature at runtime — exactly what a
//! scripting front end needs since signatures are discovered from a header file, not known at
//! compile time.
//!
//! Struct arguments are always passed by pointer rather than by value: the language never needs
//! to match a platform's struct-passing ABI, only to read and write fields through a pointer
//! obtained from `malloc`-style allocation or a returned pointer.

use std::cell::RefCell;
use std::ffi::CString;

use libffi::middle::{Arg, Cif, CodePtr, Type as FfiType};

use crate::error::{Diagnostic, ErrorKind};
use crate::heap::{Heap, HeapData};
use crate::intern::Interner;
use crate::native::ctype::CType;
use crate::value::Value;

fn err(message: impl Into<String>) -> Diagnostic {
    Diagnostic::at_line(ErrorKind::Foreign, message, 0)
}

/// A field within a [`StructDesc`]: name, type, and byte offset from the struct's start.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    pub name: String,
    pub ty: CType,
    pub offset: usize,
}

/// Layout of a C struct type discovered from a header or declared by the host.
#[derive(Debug, Clone)]
pub struct StructDesc {
    pub name: String,
    pub fields: Vec<FieldDesc>,
    pub size: usize,
}

impl StructDesc {
    /// Lays out `fields` in declaration order using natural alignment — each field aligned to its
    /// own size, capped at 8 bytes, the same rule an unpacked C struct follows — then rounds the
    /// final size up to the struct's own alignment so an array of these structs stays aligned too.
    #[must_use]
    pub fn new(name: String, field_types: Vec<(String, CType)>) -> Self {
        let mut fields = Vec::with_capacity(field_types.len());
        let mut offset = 0usize;
        let mut max_align = 1usize;
        for (field_name, ty) in field_types {
            let align = ty.size().clamp(1, 8);
            max_align = max_align.max(align);
            offset = offset.div_ceil(align) * align;
            fields.push(FieldDesc { name: field_name, ty, offset });
            offset += ty.size().max(1);
        }
        let size = offset.div_ceil(max_align) * max_align;
        Self { name, size, fields }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDesc> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A raw struct instance: a byte buffer laid out per a [`StructDesc`].
#[derive(Debug, Clone)]
pub struct ForeignStruct {
    pub desc: std::rc::Rc<StructDesc>,
    pub bytes: Vec<u8>,
}

/// A callable discovered from a dynamic library symbol.
pub struct ForeignFunction {
    pub name: String,
    pub return_type: CType,
    pub param_types: Vec<CType>,
    pub is_variadic: bool,
    pub func_ptr: *const (),
    cif: RefCell<Option<Cif>>,
}

// The function pointer is a plain code address resolved once at load time and never mutated;
// evaluation is single-threaded so sharing it across heap entries is safe.
unsafe impl Send for ForeignFunction {}
unsafe impl Sync for ForeignFunction {}

impl std::fmt::Debug for ForeignFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignFunction").field("name", &self.name).field("param_types", &self.param_types).finish()
    }
}

impl ForeignFunction {
    #[must_use]
    pub fn new(name: String, return_type: CType, param_types: Vec<CType>, is_variadic: bool, func_ptr: *const ()) -> Self {
        Self { name, return_type, param_types, is_variadic, func_ptr, cif: RefCell::new(None) }
    }

    fn prepare(&self) {
        if self.cif.borrow().is_some() {
            return;
        }
        let args: Vec<FfiType> = self.param_types.iter().map(|t| t.to_ffi_type()).collect();
        let cif = Cif::new(args, self.return_type.to_ffi_type());
        *self.cif.borrow_mut() = Some(cif);
    }
}

/// Owned native representation of one marshalled argument, kept alive for the duration of the
/// call since `libffi::middle::Arg` only borrows.
///
/// `CStr`/`Bytes` carry the pointer libffi should see alongside the buffer it points into: taking
/// the buffer's address lazily in `as_arg` would borrow a temporary that doesn't outlive the
/// call, so the pointer is computed once here and stored next to the data it points at.
enum CBox {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    CStr { _buf: CString, ptr: *const std::os::raw::c_char },
    Bytes { _buf: Vec<u8>, ptr: *const u8 },
}

/// Converts a runtime [`Value`] into the native bit pattern `ty` expects.
pub fn marshal_to_c(value: &Value, ty: CType, heap: &Heap, interner: &Interner) -> crate::error::Result<CBox> {
    let as_int = |v: &Value| -> crate::error::Result<i64> {
        match v {
            Value::Int(n) => Ok(*n),
            Value::Bool(b) => Ok(i64::from(*b)),
            _ => Err(err(format!("cannot marshal {} as {}", describe(v, heap), ty.name()))),
        }
    };
    let as_float = |v: &Value| -> crate::error::Result<f64> {
        match v {
            Value::Float(n) => Ok(*n),
            Value::Int(n) => Ok(*n as f64),
            _ => Err(err(format!("cannot marshal {} as {}", describe(v, heap), ty.name()))),
        }
    };

    Ok(match ty {
        CType::Void => return Err(err("cannot marshal a value as void")),
        CType::Char | CType::SChar | CType::Int8 => CBox::I8(as_int(value)? as i8),
        CType::UChar | CType::Bool | CType::UInt8 => CBox::U8(as_int(value)? as u8),
        CType::Short | CType::Int16 => CBox::I16(as_int(value)? as i16),
        CType::UShort | CType::UInt16 => CBox::U16(as_int(value)? as u16),
        CType::Int | CType::Int32 => CBox::I32(as_int(value)? as i32),
        CType::UInt | CType::UInt32 => CBox::U32(as_int(value)? as u32),
        CType::Long | CType::LongLong | CType::SizeT | CType::Int64 => CBox::I64(as_int(value)?),
        CType::ULong | CType::ULongLong | CType::UInt64 => CBox::U64(as_int(value)? as u64),
        CType::Float => CBox::F32(as_float(value)? as f32),
        CType::Double => CBox::F64(as_float(value)?),
        CType::StringPtr => {
            let Value::Ref(id) = value else { return Err(err(format!("cannot marshal {} as string", describe(value, heap)))) };
            let HeapData::Str(s) = heap.get(*id) else {
                return Err(err(format!("cannot marshal {} as string", describe(value, heap))));
            };
            let buf = CString::new(s.as_str()).map_err(|_| err("string contains an interior NUL byte"))?;
            let ptr = buf.as_ptr();
            CBox::CStr { _buf: buf, ptr }
        }
        CType::Pointer => {
            let Value::Ref(id) = value else { return Err(err(format!("cannot marshal {} as pointer", describe(value, heap)))) };
            let HeapData::ForeignPointer(addr) = heap.get(*id) else {
                return Err(err(format!("cannot marshal {} as pointer", describe(value, heap))));
            };
            CBox::U64(*addr as u64)
        }
        CType::Struct => {
            let Value::Ref(id) = value else { return Err(err(format!("cannot marshal {} as struct", describe(value, heap)))) };
            let HeapData::ForeignStruct(s) = heap.get(*id) else {
                return Err(err(format!("cannot marshal {} as struct", describe(value, heap))));
            };
            let buf = s.bytes.clone();
            let ptr = buf.as_ptr();
            CBox::Bytes { _buf: buf, ptr }
        }
    })
}

/// Infers the C type of an excess variadic argument from its scripting-level kind: int/bool
/// promote to `int`, float to `double`, a string to `char*`, anything else to a raw pointer. Used
/// for arguments past a variadic function's fixed parameter list, where there is no declared type
/// to marshal against.
fn infer_variadic_type(value: &Value, heap: &Heap) -> CType {
    match value {
        Value::Int(_) | Value::Bool(_) => CType::Int,
        Value::Float(_) => CType::Double,
        Value::Nil => CType::Pointer,
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(_) => CType::StringPtr,
            _ => CType::Pointer,
        },
    }
}

/// Writes `value` into `ty`'s native byte representation — the marshal-in half of struct field
/// assignment, mirroring [`marshal_from_c`]'s marshal-out. A string field leaks its backing buffer
/// deliberately: a struct field's lifetime isn't scoped to the call that set it, the same
/// process-lifetime ownership a loaded library handle gets.
pub fn marshal_to_bytes(value: &Value, ty: CType, heap: &Heap) -> crate::error::Result<Vec<u8>> {
    let as_int = |v: &Value| -> crate::error::Result<i64> {
        match v {
            Value::Int(n) => Ok(*n),
            Value::Bool(b) => Ok(i64::from(*b)),
            _ => Err(err(format!("cannot marshal {} as {}", describe(v, heap), ty.name()))),
        }
    };
    let as_float = |v: &Value| -> crate::error::Result<f64> {
        match v {
            Value::Float(n) => Ok(*n),
            Value::Int(n) => Ok(*n as f64),
            _ => Err(err(format!("cannot marshal {} as {}", describe(v, heap), ty.name()))),
        }
    };

    Ok(match ty {
        CType::Void => return Err(err("cannot marshal a value as void")),
        CType::Char | CType::SChar | CType::Int8 => (as_int(value)? as i8).to_le_bytes().to_vec(),
        CType::UChar | CType::Bool | CType::UInt8 => (as_int(value)? as u8).to_le_bytes().to_vec(),
        CType::Short | CType::Int16 => (as_int(value)? as i16).to_le_bytes().to_vec(),
        CType::UShort | CType::UInt16 => (as_int(value)? as u16).to_le_bytes().to_vec(),
        CType::Int | CType::Int32 => (as_int(value)? as i32).to_le_bytes().to_vec(),
        CType::UInt | CType::UInt32 => (as_int(value)? as u32).to_le_bytes().to_vec(),
        CType::Long | CType::LongLong | CType::SizeT | CType::Int64 => as_int(value)?.to_le_bytes().to_vec(),
        CType::ULong | CType::ULongLong | CType::UInt64 => (as_int(value)? as u64).to_le_bytes().to_vec(),
        CType::Float => (as_float(value)? as f32).to_le_bytes().to_vec(),
        CType::Double => as_float(value)?.to_le_bytes().to_vec(),
        CType::StringPtr => {
            let addr: u64 = match value {
                Value::Nil => 0,
                Value::Ref(id) => match heap.get(*id) {
                    HeapData::Str(s) => {
                        let cstr = CString::new(s.as_str()).map_err(|_| err("string contains an interior NUL byte"))?;
                        cstr.into_raw() as u64
                    }
                    _ => return Err(err(format!("cannot marshal {} as string", describe(value, heap)))),
                },
                _ => return Err(err(format!("cannot marshal {} as string", describe(value, heap)))),
            };
            addr.to_le_bytes().to_vec()
        }
        CType::Pointer => {
            let addr: u64 = match value {
                Value::Nil => 0,
                Value::Ref(id) => match heap.get(*id) {
                    HeapData::ForeignPointer(addr) => *addr as u64,
                    HeapData::ForeignStruct(s) => s.bytes.as_ptr() as u64,
                    _ => return Err(err(format!("cannot marshal {} as pointer", describe(value, heap)))),
                },
                _ => return Err(err(format!("cannot marshal {} as pointer", describe(value, heap)))),
            };
            addr.to_le_bytes().to_vec()
        }
        CType::Struct => return Err(err("cannot marshal a struct by value into a field")),
    })
}

fn describe(value: &Value, heap: &Heap) -> &'static str {
    value.type_name(heap)
}

impl CBox {
    fn as_arg(&self) -> Arg {
        match self {
            CBox::I8(v) => Arg::new(v),
            CBox::U8(v) => Arg::new(v),
            CBox::I16(v) => Arg::new(v),
            CBox::U16(v) => Arg::new(v),
            CBox::I32(v) => Arg::new(v),
            CBox::U32(v) => Arg::new(v),
            CBox::I64(v) => Arg::new(v),
            CBox::U64(v) => Arg::new(v),
            CBox::F32(v) => Arg::new(v),
            CBox::F64(v) => Arg::new(v),
            CBox::CStr { ptr, .. } => Arg::new(ptr),
            CBox::Bytes { ptr, .. } => Arg::new(ptr),
        }
    }
}

/// Reads a native return value of type `ty` back out of `bytes` into a runtime [`Value`].
pub fn marshal_from_c(bytes: &[u8], ty: CType, heap: &mut Heap, interner: &mut Interner) -> crate::error::Result<Value> {
    fn take<const N: usize>(bytes: &[u8]) -> [u8; N] {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&bytes[..N.min(bytes.len())]);
        buf
    }

    Ok(match ty {
        CType::Void => Value::Nil,
        CType::Char | CType::SChar | CType::Int8 => Value::Int(i64::from(i8::from_le_bytes(take(bytes)))),
        CType::UChar | CType::Bool | CType::UInt8 => Value::Int(i64::from(u8::from_le_bytes(take(bytes)))),
        CType::Short | CType::Int16 => Value::Int(i64::from(i16::from_le_bytes(take(bytes)))),
        CType::UShort | CType::UInt16 => Value::Int(i64::from(u16::from_le_bytes(take(bytes)))),
        CType::Int | CType::Int32 => Value::Int(i64::from(i32::from_le_bytes(take(bytes)))),
        CType::UInt | CType::UInt32 => Value::Int(i64::from(u32::from_le_bytes(take(bytes)))),
        CType::Long | CType::LongLong | CType::SizeT | CType::Int64 => Value::Int(i64::from_le_bytes(take(bytes))),
        CType::ULong | CType::ULongLong | CType::UInt64 => Value::Int(u64::from_le_bytes(take(bytes)) as i64),
        CType::Float => Value::Float(f64::from(f32::from_le_bytes(take(bytes)))),
        CType::Double => Value::Float(f64::from_le_bytes(take(bytes))),
        CType::StringPtr => {
            let addr = u64::from_le_bytes(take(bytes)) as usize;
            let s = if addr == 0 {
                String::new()
            } else {
                // SAFETY: the pointer came from a C callee that promised a null-terminated string.
                unsafe { std::ffi::CStr::from_ptr(addr as *const std::os::raw::c_char) }.to_string_lossy().into_owned()
            };
            let _ = interner;
            Value::Ref(heap.intern_str(s))
        }
        CType::Pointer => {
            let addr = u64::from_le_bytes(take(bytes)) as usize;
            Value::Ref(heap.allocate(HeapData::ForeignPointer(addr)))
        }
        CType::Struct => return Err(err("struct-valued returns are not supported; use a pointer return instead")),
    })
}

/// Invokes a prepared foreign function with already-evaluated arguments.
pub fn call(
    func: &ForeignFunction,
    args: &[Value],
    heap: &mut Heap,
    interner: &mut Interner,
) -> crate::error::Result<Value> {
    if !func.is_variadic && args.len() != func.param_types.len() {
        return Err(err(format!(
            "{} expects {} argument(s), got {}",
            func.name,
            func.param_types.len(),
            args.len()
        )));
    }
    tracing::debug!(function = %func.name, args = args.len(), "dispatching foreign call");
    func.prepare();

    let mut boxed = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let ty = func.param_types.get(i).copied().unwrap_or_else(|| infer_variadic_type(arg, heap));
        boxed.push(marshal_to_c(arg, ty, heap, interner)?);
    }
    let ffi_args: Vec<Arg> = boxed.iter().map(CBox::as_arg).collect();

    let cif_guard = func.cif.borrow();
    let cif = cif_guard.as_ref().expect("prepare() always populates the cif");
    let code_ptr = CodePtr(func.func_ptr as *mut _);

    // SAFETY: `cif` was built from `func.param_types`/`func.return_type`, which describe the
    // actual signature of the symbol at `func.func_ptr`; `boxed` keeps every argument's backing
    // storage alive for the duration of the call.
    unsafe {
        Ok(match func.return_type {
            CType::Void => {
                cif.call::<()>(code_ptr, &ffi_args);
                Value::Nil
            }
            CType::Char | CType::SChar | CType::Int8 => Value::Int(i64::from(cif.call::<i8>(code_ptr, &ffi_args))),
            CType::UChar | CType::Bool | CType::UInt8 => Value::Int(i64::from(cif.call::<u8>(code_ptr, &ffi_args))),
            CType::Short | CType::Int16 => Value::Int(i64::from(cif.call::<i16>(code_ptr, &ffi_args))),
            CType::UShort | CType::UInt16 => Value::Int(i64::from(cif.call::<u16>(code_ptr, &ffi_args))),
            CType::Int | CType::Int32 => Value::Int(i64::from(cif.call::<i32>(code_ptr, &ffi_args))),
            CType::UInt | CType::UInt32 => Value::Int(i64::from(cif.call::<u32>(code_ptr, &ffi_args))),
            CType::Long | CType::LongLong | CType::SizeT | CType::Int64 => Value::Int(cif.call::<i64>(code_ptr, &ffi_args)),
            CType::ULong | CType::ULongLong | CType::UInt64 => Value::Int(cif.call::<u64>(code_ptr, &ffi_args) as i64),
            CType::Float => Value::Float(f64::from(cif.call::<f32>(code_ptr, &ffi_args))),
            CType::Double => Value::Float(cif.call::<f64>(code_ptr, &ffi_args)),
            CType::StringPtr => {
                let ptr = cif.call::<*const std::os::raw::c_char>(code_ptr, &ffi_args);
                let s = if ptr.is_null() { String::new() } else { std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned() };
                let _ = interner;
                Value::Ref(heap.intern_str(s))
            }
            CType::Pointer => {
                let ptr = cif.call::<*mut std::ffi::c_void>(code_ptr, &ffi_args);
                Value::Ref(heap.allocate(HeapData::ForeignPointer(ptr as usize)))
            }
            CType::Struct => return Err(err("struct-valued returns are not supported; use a pointer return instead")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layout_aligns_fields_and_pads_to_struct_alignment() {
        // { char tag; int count; double ratio; } — natural C layout pads tag to 4, count to 8.
        let desc = StructDesc::new(
            "mixed".to_string(),
            vec![("tag".to_string(), CType::Char), ("count".to_string(), CType::Int), ("ratio".to_string(), CType::Double)],
        );
        assert_eq!(desc.field("tag").unwrap().offset, 0);
        assert_eq!(desc.field("count").unwrap().offset, 4);
        assert_eq!(desc.field("ratio").unwrap().offset, 8);
        assert_eq!(desc.size, 16);
    }

    #[test]
    fn struct_layout_with_no_padding_needed_is_packed_tight() {
        let desc = StructDesc::new("point".to_string(), vec![("x".to_string(), CType::Int), ("y".to_string(), CType::Int)]);
        assert_eq!(desc.field("x").unwrap().offset, 0);
        assert_eq!(desc.field("y").unwrap().offset, 4);
        assert_eq!(desc.size, 8);
    }

    #[test]
    fn variadic_type_inferred_from_value_kind() {
        let mut heap = Heap::new();
        let s = heap.intern_str("hi".to_string());
        assert_eq!(infer_variadic_type(&Value::Int(1), &heap), CType::Int);
        assert_eq!(infer_variadic_type(&Value::Bool(true), &heap), CType::Int);
        assert_eq!(infer_variadic_type(&Value::Float(1.5), &heap), CType::Double);
        assert_eq!(infer_variadic_type(&Value::Ref(s), &heap), CType::StringPtr);
        assert_eq!(infer_variadic_type(&Value::Nil, &heap), CType::Pointer);
    }
}
