//! Explicit bindings: one resolver per concrete type, installed when the
//! registry is built.

use std::any::TypeId;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use netroom_transport::ClientId;
use uuid::Uuid;

use crate::resolver::{FnResolver, Nullability, Resolvable, Resolver};
use crate::{NetReader, NetWriter, RegistryBuilder, SerdeError};

const NANOS_PER_SEC: u32 = 1_000_000_000;

macro_rules! resolvable {
    ($($ty:ty),* $(,)?) => {
        $( impl Resolvable for $ty {} )*
    };
}

resolvable!(
    bool, u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, f32, f64, char,
    String, Box<str>, Arc<str>, Uuid, Duration, SystemTime, ClientId,
);

macro_rules! primitives {
    ($builder:ident; $($ty:ty => $put:ident, $take:ident;)*) => {
        $(
            $builder.explicit_fn::<$ty>(
                |_, w, v| {
                    w.$put(*v);
                    Ok(())
                },
                |_, r| r.$take(),
            );
        )*
    };
}

/// Installs every built-in explicit binding and the string matcher.
pub(crate) fn install(builder: &mut RegistryBuilder) {
    primitives! { builder;
        u8 => put_u8, take_u8;
        i8 => put_i8, take_i8;
        u16 => put_u16, take_u16;
        i16 => put_i16, take_i16;
        u32 => put_u32, take_u32;
        i32 => put_i32, take_i32;
        u64 => put_u64, take_u64;
        i64 => put_i64, take_i64;
        u128 => put_u128, take_u128;
        i128 => put_i128, take_i128;
        f32 => put_f32, take_f32;
        f64 => put_f64, take_f64;
    }

    builder.explicit_fn::<bool>(
        |_, w, v| {
            w.put_bool(*v);
            Ok(())
        },
        |_, r| match r.take_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SerdeError::mismatch::<bool>(format!("byte {other}"))),
        },
    );

    builder.explicit_fn::<char>(
        |_, w, v| {
            w.put_u32(u32::from(*v));
            Ok(())
        },
        |_, r| {
            let raw = r.take_u32()?;
            char::from_u32(raw)
                .ok_or_else(|| SerdeError::mismatch::<char>(format!("scalar {raw:#x}")))
        },
    );

    builder.explicit::<String>(Arc::new(
        FnResolver::<String>::new(|_, w, v| write_str(w, v), |_, r| read_str(r))
            .with_nullability(Nullability::Length),
    ));

    builder.explicit::<Vec<u8>>(Arc::new(
        FnResolver::<Vec<u8>>::new(
            |_, w, v| {
                w.put_length(v.len())?;
                w.put_bytes(v);
                Ok(())
            },
            |_, r| {
                let len = r
                    .take_length()?
                    .ok_or_else(|| SerdeError::mismatch::<Vec<u8>>("null"))?;
                Ok(r.take_span(len)?.to_vec())
            },
        )
        .with_nullability(Nullability::Length),
    ));

    builder.explicit_fn::<Uuid>(
        |_, w, v| {
            w.put_bytes(&v.to_bytes_le());
            Ok(())
        },
        |_, r| Ok(Uuid::from_bytes_le(r.take_array()?)),
    );

    // Durations: `u64` seconds then `u32` nanoseconds.
    builder.explicit_fn::<Duration>(
        |_, w, v| {
            w.put_u64(v.as_secs());
            w.put_u32(v.subsec_nanos());
            Ok(())
        },
        |_, r| {
            let secs = r.take_u64()?;
            let nanos = take_subsec_nanos::<Duration>(r)?;
            Ok(Duration::new(secs, nanos))
        },
    );

    // Timestamps: signed `i64` seconds from the Unix epoch, then `u32`
    // nanoseconds counted forward from that second.
    builder.explicit_fn::<SystemTime>(
        |_, w, v| {
            let (secs, nanos) = epoch_offset(*v)?;
            w.put_i64(secs);
            w.put_u32(nanos);
            Ok(())
        },
        |_, r| {
            let secs = r.take_i64()?;
            let nanos = take_subsec_nanos::<SystemTime>(r)?;
            let whole = Duration::from_secs(secs.unsigned_abs());
            let second = if secs >= 0 {
                UNIX_EPOCH.checked_add(whole)
            } else {
                UNIX_EPOCH.checked_sub(whole)
            };
            second
                .and_then(|t| t.checked_add(Duration::from_nanos(u64::from(nanos))))
                .ok_or_else(|| SerdeError::mismatch::<SystemTime>(format!("{secs}s {nanos}ns")))
        },
    );

    builder.explicit_fn::<ClientId>(
        |_, w, v| {
            w.put_u64(v.into_inner());
            Ok(())
        },
        |_, r| Ok(ClientId::new(r.take_u64()?)),
    );

    builder.matcher(shared_str_matcher);
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

pub(crate) fn write_str(w: &mut NetWriter, value: &str) -> Result<(), SerdeError> {
    w.put_length(value.len())?;
    w.put_bytes(value.as_bytes());
    Ok(())
}

pub(crate) fn read_str(r: &mut NetReader<'_>) -> Result<String, SerdeError> {
    let len = r
        .take_length()?
        .ok_or_else(|| SerdeError::mismatch::<String>("null"))?;
    if len == 0 {
        return Ok(String::new());
    }
    let bytes = r.take_span(len)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| SerdeError::InvalidUtf8)
}

/// Binds owned and shared string slices to the `String` wire form.
fn shared_str_matcher(id: TypeId) -> Option<Arc<dyn Resolver>> {
    if id == TypeId::of::<Box<str>>() {
        let r = FnResolver::<Box<str>>::new(
            |_, w, v| write_str(w, v),
            |_, r| read_str(r).map(String::into_boxed_str),
        );
        return Some(Arc::new(r.with_nullability(Nullability::Length)));
    }
    if id == TypeId::of::<Arc<str>>() {
        let r = FnResolver::<Arc<str>>::new(
            |_, w, v| write_str(w, v),
            |_, r| read_str(r).map(Arc::from),
        );
        return Some(Arc::new(r.with_nullability(Nullability::Length)));
    }
    None
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

fn take_subsec_nanos<T: 'static>(r: &mut NetReader<'_>) -> Result<u32, SerdeError> {
    let nanos = r.take_u32()?;
    if nanos >= NANOS_PER_SEC {
        return Err(SerdeError::mismatch::<T>(format!("{nanos} subsecond nanos")));
    }
    Ok(nanos)
}

fn epoch_offset(time: SystemTime) -> Result<(i64, u32), SerdeError> {
    let overflow = |d: Duration| SerdeError::mismatch::<i64>(format!("{d:?} from epoch"));
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => {
            let secs = i64::try_from(after.as_secs()).map_err(|_| overflow(after))?;
            Ok((secs, after.subsec_nanos()))
        }
        Err(before) => {
            let before = before.duration();
            let secs = i64::try_from(before.as_secs()).map_err(|_| overflow(before))?;
            match before.subsec_nanos() {
                0 => Ok((-secs, 0)),
                nanos => Ok((-secs - 1, NANOS_PER_SEC - nanos)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Registry, ResolverKind, SerdeError};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[test]
    fn test_string_wire_form() {
        let registry = Registry::with_defaults();
        assert_eq!(registry.to_bytes(&String::new()).unwrap(), vec![1, 0]);
        assert_eq!(
            registry.to_bytes(&String::from("hé")).unwrap(),
            vec![4, 0, b'h', 0xC3, 0xA9]
        );
    }

    #[test]
    fn test_null_string_is_mismatch_without_option() {
        let registry = Registry::with_defaults();
        assert!(matches!(
            registry.from_bytes::<String>(&[0, 0]),
            Err(SerdeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_reported() {
        let registry = Registry::with_defaults();
        assert_eq!(
            registry.from_bytes::<String>(&[3, 0, 0xFF, 0xFE]),
            Err(SerdeError::InvalidUtf8)
        );
    }

    #[test]
    fn test_bool_is_strict() {
        let registry = Registry::with_defaults();
        assert!(registry.from_bytes::<bool>(&[1]).unwrap());
        assert!(registry.from_bytes::<bool>(&[2]).is_err());
    }

    #[test]
    fn test_shared_strings_use_matcher() {
        let registry = Registry::with_defaults();
        let value: Arc<str> = Arc::from("room");
        let bytes = registry.to_bytes(&value).unwrap();
        assert_eq!(bytes, registry.to_bytes(&String::from("room")).unwrap());
        assert_eq!(&*registry.from_bytes::<Arc<str>>(&bytes).unwrap(), "room");
        assert_eq!(
            registry.resolve::<Box<str>>().unwrap().kind(),
            ResolverKind::Explicit
        );
    }

    #[test]
    fn test_duration_keeps_every_nanosecond() {
        let registry = Registry::with_defaults();
        let span = Duration::from_nanos(150);
        let bytes = registry.to_bytes(&span).unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(registry.from_bytes::<Duration>(&bytes).unwrap(), span);

        let long = Duration::new(86_400 * 365, 999_999_999);
        let bytes = registry.to_bytes(&long).unwrap();
        assert_eq!(registry.from_bytes::<Duration>(&bytes).unwrap(), long);
    }

    #[test]
    fn test_system_time_before_and_after_epoch() {
        let registry = Registry::with_defaults();
        for time in [
            UNIX_EPOCH,
            UNIX_EPOCH + Duration::from_nanos(1_700_000_000_123_456_789),
            UNIX_EPOCH - Duration::from_secs(3),
            UNIX_EPOCH - Duration::new(3, 250),
        ] {
            let bytes = registry.to_bytes(&time).unwrap();
            assert_eq!(registry.from_bytes::<SystemTime>(&bytes).unwrap(), time);
        }

        let bytes = registry.to_bytes(&(UNIX_EPOCH - Duration::new(3, 250))).unwrap();
        assert_eq!(&bytes[..8], &(-4i64).to_le_bytes());
        assert_eq!(&bytes[8..], &(1_000_000_000u32 - 250).to_le_bytes());
    }

    #[test]
    fn test_out_of_range_subsecond_nanos_are_rejected() {
        let registry = Registry::with_defaults();
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&1_000_000_000u32.to_le_bytes());
        let err = registry.from_bytes::<Duration>(&bytes).unwrap_err();
        assert!(matches!(err, SerdeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_uuid_is_sixteen_bytes() {
        let registry = Registry::with_defaults();
        let id = uuid::Uuid::new_v4();
        let bytes = registry.to_bytes(&id).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(registry.from_bytes::<uuid::Uuid>(&bytes).unwrap(), id);
    }
}
