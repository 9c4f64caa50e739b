//! Array member views

use std::fmt;

use memtools_sdk::{Address, DataType, POINTER_SIZE};

use super::descriptor::TypeRef;
use super::instance::{check_native, Instance};
use super::manager::TypeManager;
use super::AccessError;
use crate::memory::{read_value, write_value, NativeType, Value};

/// Indexed access to an array member
///
/// Arrays without a declared length are unbounded; indexing them is only
/// as safe as the index.
#[derive(Clone)]
pub struct ArrayView {
    name: String,
    start: Address,
    ty: TypeRef,
    length: Option<usize>,
    pointers: bool,
    stride: usize,
    manager: TypeManager,
}

impl ArrayView {
    /// # Safety
    /// `start` must point at the array's first element (or element pointer)
    /// for as long as the view is used.
    pub(super) unsafe fn new(
        name: &str,
        start: Address,
        ty: TypeRef,
        length: Option<usize>,
        pointers: bool,
        manager: TypeManager,
    ) -> Result<Self, AccessError> {
        let stride = if pointers {
            POINTER_SIZE
        } else {
            match &ty {
                TypeRef::Native(ty) => ty.size(),
                TypeRef::Custom(type_name) => manager
                    .get(type_name)
                    .ok_or_else(|| AccessError::UnknownType(type_name.clone()))?
                    .size()
                    .ok_or_else(|| AccessError::UnknownSize(type_name.clone()))?,
            }
        };

        Ok(Self {
            name: name.to_string(),
            start,
            ty,
            length,
            pointers,
            stride,
            manager,
        })
    }

    /// Address of the first element slot
    pub fn start(&self) -> Address {
        self.start
    }

    /// Declared length, if any
    pub fn len(&self) -> Option<usize> {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == Some(0)
    }

    pub fn element_type(&self) -> &TypeRef {
        &self.ty
    }

    /// Distance between element slots in bytes
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Address of slot `index`
    ///
    /// For pointer arrays this is where the element pointer is stored.
    pub fn slot(&self, index: usize) -> Result<Address, AccessError> {
        if let Some(length) = self.length {
            if index >= length {
                return Err(AccessError::IndexOutOfBounds { index, length });
            }
        }
        index
            .checked_mul(self.stride)
            .and_then(|offset| self.start.value().checked_add(offset))
            .map(Address::new)
            .ok_or_else(|| AccessError::AddressOverflow {
                member: self.name.clone(),
                index,
            })
    }

    /// Address of element `index`, following the element pointer if needed
    pub fn element(&self, index: usize) -> Result<Address, AccessError> {
        let slot = self.slot(index)?;
        if !self.pointers {
            return Ok(slot);
        }

        // SAFETY: guaranteed by the contract of `ArrayView::new`
        let element = unsafe { slot.deref() };
        if element.is_null() {
            return Err(AccessError::NullPointer(format!("{}[{}]", self.name, index)));
        }
        Ok(element)
    }

    fn native(&self) -> Result<DataType, AccessError> {
        match &self.ty {
            TypeRef::Native(ty) => Ok(*ty),
            TypeRef::Custom(_) => Err(AccessError::WrongKind {
                member: self.name.clone(),
                expected: "native array",
                found: "object array",
            }),
        }
    }

    pub fn get(&self, index: usize) -> Result<Value, AccessError> {
        let ty = self.native()?;
        let element = self.element(index)?;
        // SAFETY: guaranteed by the contract of `ArrayView::new`
        Ok(unsafe { read_value(element, ty) })
    }

    pub fn set(&self, index: usize, value: Value) -> Result<(), AccessError> {
        let ty = self.native()?;
        let element = self.element(index)?;
        // SAFETY: guaranteed by the contract of `ArrayView::new`
        unsafe { write_value(element, ty, &value) }?;
        Ok(())
    }

    pub fn read<T: NativeType>(&self, index: usize) -> Result<T, AccessError> {
        check_native::<T>(self.native()?)?;
        let element = self.element(index)?;
        // SAFETY: guaranteed by the contract of `ArrayView::new`; layouts match
        Ok(unsafe { T::read_from(element) })
    }

    pub fn write<T: NativeType>(&self, index: usize, value: T) -> Result<(), AccessError> {
        check_native::<T>(self.native()?)?;
        let element = self.element(index)?;
        // SAFETY: guaranteed by the contract of `ArrayView::new`; layouts match
        unsafe { element.write(value) };
        Ok(())
    }

    /// View element `index` of an object array
    pub fn get_instance(&self, index: usize) -> Result<Instance, AccessError> {
        let TypeRef::Custom(type_name) = &self.ty else {
            return Err(AccessError::WrongKind {
                member: self.name.clone(),
                expected: "object array",
                found: "native array",
            });
        };
        let element = self.element(index)?;
        // SAFETY: elements of a valid array are valid objects
        unsafe { self.manager.instance(type_name, element) }
    }

    /// Every element of a bounded native array
    pub fn values(&self) -> Result<Vec<Value>, AccessError> {
        let length = self
            .length
            .ok_or_else(|| AccessError::UnknownSize(self.name.clone()))?;
        (0..length).map(|index| self.get(index)).collect()
    }
}

impl fmt::Debug for ArrayView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayView")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("type", &self.ty)
            .field("length", &self.length)
            .field("pointers", &self.pointers)
            .finish()
    }
}
