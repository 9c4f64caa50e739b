//! Registered binaries and signature lookup
//!
//! The host registers every loaded module it wants to expose, and the
//! registry resolves identifiers inside them. Signature hits are cached
//! per (binary, identifier).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, trace};

use memtools_sdk::Address;

use crate::error::ResolveError;
use crate::resolver::{follow_pointers, AddressResolver, Identifier};

/// A module image mapped into the current process
pub struct Binary {
    name: String,
    base: Address,
    size: usize,
    server: bool,
    symbols: HashMap<String, Address>,
}

// SAFETY: The image is only read, and `Binary::new` requires it to stay mapped
unsafe impl Send for Binary {}
unsafe impl Sync for Binary {}

impl Binary {
    /// Describe a mapped module
    ///
    /// # Safety
    /// `base..base + size` must stay readable for as long as this value (or
    /// a registry holding it) is alive.
    pub unsafe fn new(name: impl Into<String>, base: Address, size: usize) -> Self {
        Self {
            name: name.into(),
            base,
            size,
            server: false,
            symbols: HashMap::new(),
        }
    }

    /// Mark this binary as a server build
    pub fn server(mut self, server: bool) -> Self {
        self.server = server;
        self
    }

    /// Add an exported symbol
    pub fn with_symbol(mut self, name: impl Into<String>, address: Address) -> Self {
        self.symbols.insert(name.into(), address);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_server(&self) -> bool {
        self.server
    }

    /// Whether `address` lies inside this image
    pub fn contains(&self, address: Address) -> bool {
        address >= self.base && address.value() < self.base.value() + self.size
    }

    fn image(&self) -> &[u8] {
        if self.size == 0 || self.base.is_null() {
            return &[];
        }
        // SAFETY: guaranteed readable by the contract of `Binary::new`
        unsafe { std::slice::from_raw_parts(self.base.as_ptr::<u8>(), self.size) }
    }

    /// Locate an identifier inside this image
    pub fn find(&self, identifier: &Identifier, raw: &str) -> Result<Address, ResolveError> {
        match identifier {
            Identifier::Signature(pattern) => pattern
                .find_in(self.image())
                .map(|offset| self.base + offset)
                .ok_or_else(|| ResolveError::SignatureNotFound {
                    binary: self.name.clone(),
                    identifier: raw.to_string(),
                }),
            Identifier::Symbol(symbol) => {
                self.symbols
                    .get(symbol)
                    .copied()
                    .ok_or_else(|| ResolveError::SymbolNotFound {
                        binary: self.name.clone(),
                        symbol: symbol.clone(),
                    })
            }
        }
    }
}

impl std::fmt::Debug for Binary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binary")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("size", &self.size)
            .field("server", &self.server)
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

/// Collection of registered binaries
#[derive(Default)]
pub struct BinaryRegistry {
    binaries: RwLock<HashMap<String, Arc<Binary>>>,
    cache: DashMap<(String, String), Address>,
}

impl BinaryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binary, replacing any previous one with the same name
    pub fn register(&self, binary: Binary) {
        let name = binary.name.clone();
        info!(
            "Registered binary '{}' at {} ({:#x} bytes, server={})",
            name, binary.base, binary.size, binary.server
        );
        self.binaries.write().insert(name.clone(), Arc::new(binary));
        self.cache.retain(|(cached, _), _| *cached != name);
    }

    /// Remove a binary
    pub fn unregister(&self, name: &str) -> Option<Arc<Binary>> {
        let removed = self.binaries.write().remove(name);
        if removed.is_some() {
            self.cache.retain(|(cached, _), _| cached != name);
            debug!("Unregistered binary '{}'", name);
        }
        removed
    }

    /// Number of registered binaries
    pub fn len(&self) -> usize {
        self.binaries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.binaries.read().is_empty()
    }

    /// Look up a binary by name
    pub fn find_binary(&self, name: &str, srv_check: bool) -> Result<Arc<Binary>, ResolveError> {
        let binary = self
            .binaries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::BinaryNotFound(name.to_string()))?;

        if srv_check && !binary.server {
            return Err(ResolveError::NotServerBinary(name.to_string()));
        }
        Ok(binary)
    }

    fn locate(&self, binary: &str, identifier: &str, srv_check: bool) -> Result<Address, ResolveError> {
        let image = self.find_binary(binary, srv_check)?;

        let key = (binary.to_string(), identifier.to_string());
        if let Some(address) = self.cache.get(&key) {
            trace!("Cache hit for {}:{} -> {}", binary, identifier, *address);
            return Ok(*address);
        }

        let parsed = Identifier::parse(identifier)?;
        let address = image.find(&parsed, identifier)?;
        debug!("Resolved {}:{} -> {}", binary, identifier, address);

        self.cache.insert(key, address);
        Ok(address)
    }
}

impl AddressResolver for BinaryRegistry {
    fn resolve(
        &self,
        binary: &str,
        identifier: &str,
        offset: isize,
        level: usize,
        srv_check: bool,
    ) -> Result<Address, ResolveError> {
        let address = self.locate(binary, identifier, srv_check)? + offset;
        if level == 0 {
            return Ok(address);
        }

        // SAFETY: registered images are readable; further levels are the
        // pointer chain the configuration promises
        unsafe { follow_pointers(binary, identifier, address, level) }
    }
}
