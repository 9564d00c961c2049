//! Macros shared by the identifier types.

/// Implements string-based serde for a type that has `Display` and
/// `FromStr<Err = IdError>`.
///
/// Identifiers serialize in their canonical textual form so stored records
/// and log output stay human readable.
///
/// # Example
///
/// ```ignore
/// impl_string_serde!(Sid);
///
/// let json = serde_json::to_string(&sid)?; // "\"S-1-5-32-544\""
/// ```
#[macro_export]
macro_rules! impl_string_serde {
    ($name:ty) => {
        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse::<$name>().map_err(serde::de::Error::custom)
            }
        }
    };
}
