//! Server side object names.

/// Name of a server side prepared statement or portal.
///
/// Generated names are a prefix followed by a per connection counter, the empty name selects
/// the unnamed object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id {
    buf: [u8; 12],
    len: u8,
}

impl Id {
    pub(crate) fn unnamed() -> Self {
        Self { buf: [0; 12], len: 0 }
    }

    fn next(prefix: u8, counter: &mut u32) -> Self {
        *counter = counter.wrapping_add(1);

        let mut buf = [0u8; 12];
        buf[0] = prefix;
        buf[1] = b'_';

        let mut b = itoa::Buffer::new();
        let id = b.format(*counter).as_bytes();
        buf[2..2 + id.len()].copy_from_slice(id);

        Self { buf, len: (2 + id.len()) as u8 }
    }

    pub fn as_str(&self) -> &str {
        // ascii only by construction
        std::str::from_utf8(&self.buf[..self.len as usize]).unwrap_or_default()
    }

    pub fn is_unnamed(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.as_str()).finish()
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

macro_rules! delegate {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Id);

        impl $name {
            pub(crate) fn unnamed() -> Self {
                Self(Id::unnamed())
            }

            pub(crate) fn next(counter: &mut u32) -> Self {
                Self(Id::next($prefix, counter))
            }
        }

        impl std::ops::Deref for $name {
            type Target = Id;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.as_str()).finish()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

delegate!(
    /// Prepared statement name, `S_<n>`.
    StatementName, b'S'
);
delegate!(
    /// Portal name, `C_<n>`.
    PortalName, b'C'
);
