//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types. Marketplace IDs are
//! opaque strings issued by the backend API, so the wrappers hold a `String`.

/// Macro to define a type-safe string ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Conversion methods: `new()`, `as_str()`, `into_inner()`
/// - `From<String>`, `From<&str>` and `Into<String>` implementations
///
/// # Example
///
/// ```rust
/// # use bazaar_core::define_id;
/// define_id!(ServiceId);
/// define_id!(ProviderId);
///
/// let service_id = ServiceId::new("svc-1");
/// let provider_id = ProviderId::new("svc-1");
///
/// // These are different types, so this won't compile:
/// // let _: ServiceId = provider_id;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper and return the underlying string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl ::core::convert::AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

// Define standard entity IDs
define_id!(ServiceId);
define_id!(ProviderId);

// Composite cart line identity. Build it with the cart crate's key deriver
// rather than by hand; the `From` impls exist for keys read back from storage
// or typed on a command line.
define_id!(LineKey);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_matches_inner() {
        let id = ServiceId::new("cleaning-deep");
        assert_eq!(id.to_string(), "cleaning-deep");
        assert_eq!(id.as_str(), "cleaning-deep");
    }

    #[test]
    fn test_id_serde_is_transparent() {
        let id = ProviderId::from("prov-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"prov-42\"");

        let back: ProviderId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_id_conversions() {
        let key = LineKey::from(String::from("a|basic|~"));
        let raw: String = key.clone().into();
        assert_eq!(raw, "a|basic|~");
        assert_eq!(key.into_inner(), raw);
    }
}
