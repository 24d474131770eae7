use chrono::Utc;

/// Wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Serde adapter writing `U256` as a decimal string. Decoding also accepts a
/// plain JSON number so hand-written requests stay simple.
pub mod u256_dec {
    use primitive_types::U256;
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        struct DecVisitor;

        impl Visitor<'_> for DecVisitor {
            type Value = U256;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer as decimal string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<U256, E> {
                U256::from_dec_str(v).map_err(|_| E::custom(format!("invalid integer: {v}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<U256, E> {
                Ok(U256::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<U256, E> {
                u64::try_from(v)
                    .map(U256::from)
                    .map_err(|_| E::custom("negative integer"))
            }
        }

        deserializer.deserialize_any(DecVisitor)
    }
}
