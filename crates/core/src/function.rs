//! Foreign function handles
//!
//! A [`NativeFunction`] is a function at a fixed address; a
//! [`VirtualFunction`] is a vtable slot looked up on the receiver at call
//! time. Either one hands out typed host function pointers once the
//! requested Rust signature has been checked against the configured one.
//!
//! When the host cannot call the foreign convention directly, a
//! [`Trampoline`] is generated once and owned by the handle.

use std::fmt;
use std::marker::PhantomData;

use memtools_sdk::{Address, Convention, DataType, POINTER_SIZE};

use crate::abi::{dispatch, Dispatch, Host};
use crate::memory::{NativeReturn, NativeType};
use crate::trampoline::{CallTarget, Trampoline, TrampolineError};

/// Argument and return types of a foreign function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub args: Vec<DataType>,
    pub return_type: DataType,
    pub convention: Convention,
}

impl Signature {
    pub fn new(args: Vec<DataType>, return_type: DataType, convention: Convention) -> Self {
        Self {
            args,
            return_type,
            convention,
        }
    }

    /// Signature of a member function; the receiver pointer is prepended
    pub fn member(mut args: Vec<DataType>, return_type: DataType, convention: Convention) -> Self {
        args.insert(0, DataType::Pointer);
        Self::new(args, return_type, convention)
    }

    /// Byte size of each argument
    pub fn arg_sizes(&self) -> Vec<usize> {
        self.args.iter().map(|arg| arg.size()).collect()
    }

    /// Check that host function type `F` can call this signature
    pub fn accepts<F: HostFn>(&self) -> Result<(), SignatureMismatch> {
        let args = F::arg_types();
        let return_type = F::return_type();

        let compatible = args.len() == self.args.len()
            && args
                .iter()
                .zip(&self.args)
                .all(|(requested, expected)| requested.is_compatible(*expected))
            && return_type.is_compatible(self.return_type);

        if compatible {
            Ok(())
        } else {
            Err(SignatureMismatch {
                expected: self.to_string(),
                requested: format_types(&args, return_type),
            })
        }
    }
}

fn format_types(args: &[DataType], return_type: DataType) -> String {
    let args = args
        .iter()
        .map(|arg| arg.name())
        .collect::<Vec<_>>()
        .join(", ");
    format!("({}) -> {}", args, return_type)
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.convention,
            format_types(&self.args, self.return_type)
        )
    }
}

/// A requested host signature does not match the configured one
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Signature mismatch: function is {expected}, requested {requested}")]
pub struct SignatureMismatch {
    pub expected: String,
    pub requested: String,
}

/// A host function pointer type that can call foreign code
///
/// Implemented for `extern "C" fn` with up to eight [`NativeType`]
/// arguments and a [`NativeReturn`] result.
///
/// # Safety
/// `arg_types` and `return_type` must describe the pointer type exactly.
pub unsafe trait HostFn: Copy {
    fn arg_types() -> Vec<DataType>;

    fn return_type() -> DataType;

    /// Reinterpret an address as this function pointer type
    ///
    /// # Safety
    /// `address` must point at code callable with this signature.
    unsafe fn from_address(address: Address) -> Self;
}

macro_rules! host_fn {
    ($($arg:ident),*) => {
        unsafe impl<R: NativeReturn, $($arg: NativeType),*> HostFn for extern "C" fn($($arg),*) -> R {
            fn arg_types() -> Vec<DataType> {
                vec![$(<$arg as NativeType>::DATA_TYPE),*]
            }

            fn return_type() -> DataType {
                <R as NativeReturn>::DATA_TYPE
            }

            unsafe fn from_address(address: Address) -> Self {
                std::mem::transmute_copy::<usize, Self>(&address.value())
            }
        }
    };
}

host_fn!();
host_fn!(A);
host_fn!(A, B);
host_fn!(A, B, C);
host_fn!(A, B, C, D);
host_fn!(A, B, C, D, E);
host_fn!(A, B, C, D, E, G);
host_fn!(A, B, C, D, E, G, H);
host_fn!(A, B, C, D, E, G, H, I);

/// Build the trampoline a signature needs on this host, if any
fn bridge(signature: &Signature, target: CallTarget) -> Result<Option<Trampoline>, TrampolineError> {
    let host = Host::current();
    match dispatch(host, signature.convention) {
        Dispatch::Direct => Ok(None),
        Dispatch::Trampoline => {
            Trampoline::new(signature.convention, &signature.arg_sizes(), target).map(Some)
        }
        Dispatch::Unsupported => Err(TrampolineError::UnsupportedConvention {
            convention: signature.convention,
            host,
        }),
    }
}

/// A foreign function at a fixed address
#[derive(Debug)]
pub struct NativeFunction {
    address: Address,
    signature: Signature,
    trampoline: Option<Trampoline>,
}

impl NativeFunction {
    pub fn new(address: Address, signature: Signature) -> Result<Self, TrampolineError> {
        let trampoline = bridge(&signature, CallTarget::Absolute(address))?;
        Ok(Self {
            address,
            signature,
            trampoline,
        })
    }

    /// Address of the foreign code
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn trampoline(&self) -> Option<&Trampoline> {
        self.trampoline.as_ref()
    }

    /// Address the host calls: the trampoline if there is one
    pub fn entry(&self) -> Address {
        self.trampoline
            .as_ref()
            .map_or(self.address, Trampoline::entry)
    }

    /// Get a typed host function pointer
    ///
    /// # Safety
    /// The configured signature must match the foreign code.
    pub unsafe fn typed<F: HostFn>(&self) -> Result<F, SignatureMismatch> {
        self.signature.accepts::<F>()?;
        Ok(F::from_address(self.entry()))
    }

    /// Bind a receiver
    pub fn bind<F: HostFn>(&self, this: Address) -> Result<MemberFunction<F>, SignatureMismatch> {
        self.signature.accepts::<F>()?;
        Ok(MemberFunction::new(this, MemberEntry::Fixed(self.entry())))
    }
}

/// A virtual function identified by its vtable slot
#[derive(Debug)]
pub struct VirtualFunction {
    slot: usize,
    signature: Signature,
    trampoline: Option<Trampoline>,
}

impl VirtualFunction {
    /// Fails when the slot's byte offset does not fit an `isize`
    pub fn new(slot: usize, signature: Signature) -> Result<Self, TrampolineError> {
        if slot
            .checked_mul(POINTER_SIZE)
            .and_then(|bytes| isize::try_from(bytes).ok())
            .is_none()
        {
            return Err(TrampolineError::SlotOutOfRange(slot));
        }
        let trampoline = bridge(&signature, CallTarget::Virtual { slot })?;
        Ok(Self {
            slot,
            signature,
            trampoline,
        })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn trampoline(&self) -> Option<&Trampoline> {
        self.trampoline.as_ref()
    }

    /// Current vtable entry of `this`
    ///
    /// # Safety
    /// `this` must point at an object whose vtable has this slot.
    pub unsafe fn target(&self, this: Address) -> Address {
        vtable_entry(this, self.slot)
    }

    /// Bind a receiver
    ///
    /// The vtable is read again on every call through the result.
    pub fn bind<F: HostFn>(&self, this: Address) -> Result<MemberFunction<F>, SignatureMismatch> {
        self.signature.accepts::<F>()?;
        let entry = match &self.trampoline {
            Some(trampoline) => MemberEntry::Fixed(trampoline.entry()),
            None => MemberEntry::VTable(self.slot),
        };
        Ok(MemberFunction::new(this, entry))
    }
}

/// `slot` is bounded by `VirtualFunction::new`
unsafe fn vtable_entry(this: Address, slot: usize) -> Address {
    (this.deref() + slot * POINTER_SIZE).deref()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberEntry {
    Fixed(Address),
    VTable(usize),
}

/// A foreign function bound to a receiver
pub struct MemberFunction<F> {
    this: Address,
    entry: MemberEntry,
    _marker: PhantomData<F>,
}

impl<F: HostFn> MemberFunction<F> {
    fn new(this: Address, entry: MemberEntry) -> Self {
        Self {
            this,
            entry,
            _marker: PhantomData,
        }
    }

    pub fn this(&self) -> Address {
        self.this
    }

    /// Address the next call goes to
    ///
    /// # Safety
    /// For virtual functions, the receiver's vtable is read.
    pub unsafe fn entry(&self) -> Address {
        match self.entry {
            MemberEntry::Fixed(address) => address,
            MemberEntry::VTable(slot) => vtable_entry(self.this, slot),
        }
    }

    /// The host function pointer for the next call
    ///
    /// # Safety
    /// See [`MemberFunction::entry`].
    pub unsafe fn get(&self) -> F {
        F::from_address(self.entry())
    }
}

impl<F> fmt::Debug for MemberFunction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberFunction")
            .field("this", &self.this)
            .field("entry", &self.entry)
            .finish()
    }
}

macro_rules! member_call {
    ($($arg:ident),*) => {
        impl<R: NativeReturn, $($arg: NativeType),*> MemberFunction<extern "C" fn(Address, $($arg),*) -> R> {
            /// Call with the bound receiver
            ///
            /// # Safety
            /// The foreign function must match the signature and accept the receiver.
            #[allow(non_snake_case, clippy::too_many_arguments)]
            pub unsafe fn call(&self, $($arg: $arg),*) -> R {
                (self.get())(self.this, $($arg),*)
            }
        }
    };
}

member_call!();
member_call!(A);
member_call!(A, B);
member_call!(A, B, C);
member_call!(A, B, C, D);
member_call!(A, B, C, D, E);
member_call!(A, B, C, D, E, G);
member_call!(A, B, C, D, E, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn add(a: i32, b: i32) -> i32 {
        a + b
    }

    extern "C" fn scale(this: Address, factor: f32) -> f32 {
        unsafe { this.read::<f32>() * factor }
    }

    extern "C" fn answer_a(_this: Address) -> i32 {
        1
    }

    extern "C" fn answer_b(_this: Address) -> i32 {
        2
    }

    fn address_of(f: usize) -> Address {
        Address::new(f)
    }

    #[test]
    fn test_signature_display() {
        let signature = Signature::member(vec![DataType::Int], DataType::Bool, Convention::Thiscall);
        assert_eq!(signature.to_string(), "THISCALL (POINTER, INT) -> BOOL");
        assert_eq!(signature.arg_sizes(), vec![POINTER_SIZE, 4]);
    }

    #[test]
    fn test_signature_accepts() {
        let signature = Signature::new(vec![DataType::Int, DataType::Int], DataType::Int, Convention::Cdecl);
        assert!(signature.accepts::<extern "C" fn(i32, i32) -> i32>().is_ok());
        assert!(signature.accepts::<extern "C" fn(i32, i32)>().is_err());
        assert!(signature.accepts::<extern "C" fn(i32) -> i32>().is_err());
        assert!(signature.accepts::<extern "C" fn(f32, i32) -> i32>().is_err());

        let pointers = Signature::new(vec![DataType::String], DataType::Void, Convention::Cdecl);
        assert!(pointers.accepts::<extern "C" fn(*const u8)>().is_ok());
        assert!(pointers.accepts::<extern "C" fn(Address)>().is_ok());
    }

    #[test]
    fn test_call_cdecl_function() {
        let f: extern "C" fn(i32, i32) -> i32 = add;
        let signature = Signature::new(vec![DataType::Int, DataType::Int], DataType::Int, Convention::Cdecl);
        let function = NativeFunction::new(address_of(f as usize), signature).unwrap();

        assert!(function.trampoline().is_none());
        assert_eq!(function.entry(), function.address());

        let typed: extern "C" fn(i32, i32) -> i32 = unsafe { function.typed() }.unwrap();
        assert_eq!(typed(2, 3), 5);

        let wrong = unsafe { function.typed::<extern "C" fn(i32) -> i32>() };
        assert!(wrong.is_err());
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[test]
    fn test_bound_member_function() {
        let f: extern "C" fn(Address, f32) -> f32 = scale;
        let signature = Signature::member(vec![DataType::Float], DataType::Float, Convention::Thiscall);
        let function = NativeFunction::new(address_of(f as usize), signature).unwrap();

        let value = 1.5f32;
        let bound = function
            .bind::<extern "C" fn(Address, f32) -> f32>(Address::from_ptr(&value as *const f32))
            .unwrap();
        assert_eq!(unsafe { bound.call(4.0) }, 6.0);
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[test]
    fn test_virtual_dispatch_follows_vtable() {
        let a: extern "C" fn(Address) -> i32 = answer_a;
        let b: extern "C" fn(Address) -> i32 = answer_b;
        let first = [0usize, 0, a as usize];
        let second = [0usize, 0, b as usize];

        let mut object = [first.as_ptr() as usize];
        let this = Address::from_mut_ptr(object.as_mut_ptr());

        let signature = Signature::member(vec![], DataType::Int, Convention::Thiscall);
        let virtual_fn = VirtualFunction::new(2, signature).unwrap();
        let bound = virtual_fn.bind::<extern "C" fn(Address) -> i32>(this).unwrap();

        assert_eq!(unsafe { bound.call() }, 1);

        object[0] = second.as_ptr() as usize;
        assert_eq!(unsafe { bound.call() }, 2);
        assert_eq!(unsafe { virtual_fn.target(this) }, address_of(b as usize));
    }

    #[test]
    fn test_virtual_slot_out_of_range() {
        let signature = Signature::member(vec![], DataType::Int, Convention::Thiscall);
        let err = VirtualFunction::new(usize::MAX / POINTER_SIZE + 1, signature).unwrap_err();
        assert!(matches!(err, TrampolineError::SlotOutOfRange(_)));
    }

    #[test]
    fn test_unsupported_convention_fails_construction() {
        let signature = Signature::new(vec![DataType::Int], DataType::Int, Convention::Register);
        let result = NativeFunction::new(Address::new(0x1000), signature);

        match dispatch(Host::current(), Convention::Register) {
            Dispatch::Unsupported => assert!(matches!(
                result,
                Err(TrampolineError::UnsupportedConvention { .. })
            )),
            _ => assert!(result.is_ok()),
        }
    }
}
