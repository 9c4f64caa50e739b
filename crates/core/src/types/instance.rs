//! Typed views of foreign objects

use std::fmt;
use std::sync::Arc;

use memtools_sdk::{Address, DataType};

use super::array::ArrayView;
use super::descriptor::{Member, MemberKind, TypeDescriptor, TypeRef};
use super::manager::TypeManager;
use super::AccessError;
use crate::function::{HostFn, MemberFunction};
use crate::memory::{read_value, write_value, NativeType, TypeMismatch, Value};

/// A foreign object viewed through a [`TypeDescriptor`]
///
/// Created with [`TypeManager::instance`] or [`Instance::new`]. Member
/// access reads and writes the object's memory directly; nothing is cached.
#[derive(Clone)]
pub struct Instance {
    address: Address,
    ty: Arc<TypeDescriptor>,
    manager: TypeManager,
}

impl Instance {
    /// View `address` as an object of type `ty`
    ///
    /// # Safety
    /// `address` must point at a live object laid out as `ty` describes,
    /// including every pointer member reached through this view, for as long
    /// as the view (or anything derived from it) is used.
    pub unsafe fn new(address: Address, ty: Arc<TypeDescriptor>, manager: TypeManager) -> Self {
        Self {
            address,
            ty,
            manager,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.ty
    }

    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    fn member(&self, name: &str) -> Result<&Member, AccessError> {
        self.ty
            .member(name)
            .ok_or_else(|| AccessError::UnknownMember {
                type_name: self.ty.name().to_string(),
                member: name.to_string(),
            })
    }

    /// Address of a member's storage
    ///
    /// For pointer members this is the slot holding the pointer; for globals
    /// the resolved address.
    pub fn address_of(&self, name: &str) -> Result<Address, AccessError> {
        match &self.member(name)?.kind {
            MemberKind::Field { offset, .. }
            | MemberKind::Pointer { offset, .. }
            | MemberKind::Array { offset, .. } => Ok(self.address + *offset),
            MemberKind::Global { address, .. } => Ok(*address),
            other => Err(wrong_kind(name, "data member", other)),
        }
    }

    /// Where a native value of `name` lives, and its type
    fn native_slot(&self, name: &str) -> Result<(Address, DataType), AccessError> {
        match &self.member(name)?.kind {
            MemberKind::Field {
                offset,
                ty: TypeRef::Native(ty),
            } => Ok((self.address + *offset, *ty)),
            MemberKind::Pointer {
                offset,
                ty: TypeRef::Native(ty),
            } => {
                // SAFETY: guaranteed by the contract of `Instance::new`
                let target = unsafe { (self.address + *offset).deref() };
                if target.is_null() {
                    return Err(AccessError::NullPointer(name.to_string()));
                }
                Ok((target, *ty))
            }
            MemberKind::Global {
                address,
                ty: TypeRef::Native(ty),
            } => Ok((*address, *ty)),
            other => Err(wrong_kind(name, "native value", other)),
        }
    }

    /// Read a field, pointed-to value or global as a [`Value`]
    pub fn get(&self, name: &str) -> Result<Value, AccessError> {
        let (address, ty) = self.native_slot(name)?;
        // SAFETY: guaranteed by the contract of `Instance::new`
        Ok(unsafe { read_value(address, ty) })
    }

    /// Write a field, pointed-to value or global from a [`Value`]
    pub fn set(&self, name: &str, value: Value) -> Result<(), AccessError> {
        let (address, ty) = self.native_slot(name)?;
        // SAFETY: guaranteed by the contract of `Instance::new`
        unsafe { write_value(address, ty, &value) }?;
        Ok(())
    }

    /// Read a native member as a Rust type
    pub fn read<T: NativeType>(&self, name: &str) -> Result<T, AccessError> {
        let (address, ty) = self.native_slot(name)?;
        check_native::<T>(ty)?;
        // SAFETY: guaranteed by the contract of `Instance::new`; layouts match
        Ok(unsafe { T::read_from(address) })
    }

    /// Write a native member from a Rust type
    pub fn write<T: NativeType>(&self, name: &str, value: T) -> Result<(), AccessError> {
        let (address, ty) = self.native_slot(name)?;
        check_native::<T>(ty)?;
        // SAFETY: guaranteed by the contract of `Instance::new`; layouts match
        unsafe { address.write(value) };
        Ok(())
    }

    /// Raw value of a pointer member
    pub fn pointer(&self, name: &str) -> Result<Address, AccessError> {
        match &self.member(name)?.kind {
            // SAFETY: guaranteed by the contract of `Instance::new`
            MemberKind::Pointer { offset, .. } => Ok(unsafe { (self.address + *offset).deref() }),
            other => Err(wrong_kind(name, "pointer", other)),
        }
    }

    /// Point a pointer member somewhere else
    pub fn set_pointer(&self, name: &str, target: Address) -> Result<(), AccessError> {
        match &self.member(name)?.kind {
            MemberKind::Pointer { offset, .. } => {
                // SAFETY: guaranteed by the contract of `Instance::new`
                unsafe { (self.address + *offset).write(target.value()) };
                Ok(())
            }
            other => Err(wrong_kind(name, "pointer", other)),
        }
    }

    /// View an embedded, pointed-to or global object of a custom type
    pub fn get_instance(&self, name: &str) -> Result<Instance, AccessError> {
        let (address, type_name) = match &self.member(name)?.kind {
            MemberKind::Field {
                offset,
                ty: TypeRef::Custom(type_name),
            } => (self.address + *offset, type_name),
            MemberKind::Pointer {
                ty: TypeRef::Custom(type_name),
                ..
            } => (self.pointer(name)?, type_name),
            MemberKind::Global {
                address,
                ty: TypeRef::Custom(type_name),
            } => (*address, type_name),
            other => return Err(wrong_kind(name, "object", other)),
        };

        if address.is_null() {
            return Err(AccessError::NullPointer(name.to_string()));
        }
        // SAFETY: a member of a valid object is itself valid
        unsafe { self.manager.instance(type_name, address) }
    }

    /// View an array member
    pub fn array(&self, name: &str) -> Result<ArrayView, AccessError> {
        let member = self.member(name)?;
        let MemberKind::Array {
            offset,
            ty,
            length,
            layout,
        } = &member.kind
        else {
            return Err(wrong_kind(name, "array", &member.kind));
        };

        let slot = self.address + *offset;
        let start = if layout.dynamic {
            // SAFETY: guaranteed by the contract of `Instance::new`
            let start = unsafe { slot.deref() };
            if start.is_null() {
                return Err(AccessError::NullPointer(name.to_string()));
            }
            start
        } else {
            slot
        };

        // SAFETY: the array belongs to a valid object
        unsafe {
            ArrayView::new(
                name,
                start,
                ty.clone(),
                *length,
                layout.pointers,
                self.manager.clone(),
            )
        }
    }

    /// Bind a function member to this object
    ///
    /// `F` is the host signature with the receiver first, e.g.
    /// `extern "C" fn(Address, i32) -> bool`.
    pub fn function<F: HostFn>(&self, name: &str) -> Result<MemberFunction<F>, AccessError> {
        match &self.member(name)?.kind {
            MemberKind::Virtual(function) => Ok(function.bind(self.address)?),
            MemberKind::Bound(function) => Ok(function.bind(self.address)?),
            other => Err(wrong_kind(name, "function", other)),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.ty.name())
            .field("address", &self.address)
            .finish()
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.ty.name() == other.ty.name()
    }
}

pub(super) fn check_native<T: NativeType>(ty: DataType) -> Result<(), TypeMismatch> {
    if T::DATA_TYPE.is_compatible(ty) {
        Ok(())
    } else {
        Err(TypeMismatch {
            expected: ty,
            found: T::DATA_TYPE.name(),
        })
    }
}

fn wrong_kind(name: &str, expected: &'static str, found: &MemberKind) -> AccessError {
    AccessError::WrongKind {
        member: name.to_string(),
        expected,
        found: found.name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArrayLayout, Member};
    use memtools_sdk::POINTER_SIZE;

    fn player_type() -> TypeDescriptor {
        let mut ty = TypeDescriptor::new("Player", None, true, Some(2 * POINTER_SIZE));
        ty.insert(
            "health",
            Member::new(MemberKind::Field {
                offset: POINTER_SIZE as isize,
                ty: TypeRef::Native(DataType::Int),
            }),
        );
        ty.insert(
            "speed",
            Member::new(MemberKind::Field {
                offset: POINTER_SIZE as isize + 4,
                ty: TypeRef::Native(DataType::Float),
            }),
        );
        ty.insert(
            "target",
            Member::new(MemberKind::Pointer {
                offset: 0,
                ty: TypeRef::Custom("Player".to_string()),
            }),
        );
        ty.insert(
            "ammo",
            Member::new(MemberKind::Array {
                offset: POINTER_SIZE as isize,
                ty: TypeRef::Native(DataType::Int),
                length: Some(2),
                layout: ArrayLayout {
                    dynamic: false,
                    pointers: false,
                },
            }),
        );
        ty
    }

    fn view(manager: &TypeManager, buffer: &mut [usize]) -> Instance {
        let address = Address::from_mut_ptr(buffer.as_mut_ptr());
        unsafe { manager.instance("Player", address) }.unwrap()
    }

    #[test]
    fn test_field_get_set() {
        let manager = TypeManager::new();
        manager.register(player_type());
        let mut buffer = vec![0usize; 3];
        let player = view(&manager, &mut buffer);

        player.set("health", Value::Int(42)).unwrap();
        assert_eq!(player.get("health").unwrap(), Value::Int(42));
        assert_eq!(player.read::<i32>("health").unwrap(), 42);

        player.write("speed", 2.5f32).unwrap();
        assert_eq!(player.get("speed").unwrap(), Value::Float(2.5));

        assert_eq!(
            player.address_of("health").unwrap(),
            player.address() + POINTER_SIZE
        );
    }

    #[test]
    fn test_access_errors() {
        let manager = TypeManager::new();
        manager.register(player_type());
        let mut buffer = vec![0usize; 3];
        let player = view(&manager, &mut buffer);

        assert!(matches!(
            player.get("mana"),
            Err(AccessError::UnknownMember { .. })
        ));
        assert!(matches!(
            player.read::<f32>("health"),
            Err(AccessError::TypeMismatch(_))
        ));
        assert!(matches!(
            player.set("health", Value::Float(1.0)),
            Err(AccessError::TypeMismatch(_))
        ));
        assert!(matches!(
            player.get("ammo"),
            Err(AccessError::WrongKind { expected: "native value", found: "array", .. })
        ));
        assert!(matches!(
            player.get_instance("target"),
            Err(AccessError::NullPointer(_))
        ));
        assert!(matches!(
            player.function::<extern "C" fn(Address)>("health"),
            Err(AccessError::WrongKind { .. })
        ));
    }

    #[test]
    fn test_self_referencing_pointer() {
        let manager = TypeManager::new();
        manager.register(player_type());
        let mut first = vec![0usize; 3];
        let mut second = vec![0usize; 3];
        let a = view(&manager, &mut first);
        let b = view(&manager, &mut second);

        b.set("health", Value::Int(7)).unwrap();
        a.set_pointer("target", b.address()).unwrap();

        let target = a.get_instance("target").unwrap();
        assert_eq!(target, b);
        assert_eq!(target.type_name(), "Player");
        assert_eq!(target.read::<i32>("health").unwrap(), 7);
        assert_eq!(a.pointer("target").unwrap(), b.address());
    }

    #[test]
    fn test_array_member() {
        let manager = TypeManager::new();
        manager.register(player_type());
        let mut buffer = vec![0usize; 3];
        let player = view(&manager, &mut buffer);

        // ammo[1] shares storage with speed
        let ammo = player.array("ammo").unwrap();
        ammo.set(1, Value::Int(30)).unwrap();
        assert_eq!(player.read::<f32>("speed").map(f32::to_bits).unwrap(), 30);
        assert!(ammo.get(2).is_err());
    }
}
