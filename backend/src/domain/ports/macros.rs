//! `define_port_error!`: error enums for the outbound ports.
//!
//! Every port failure carries exactly one field (a message, or a number such
//! as a timeout), so the macro only accepts single-field variants. Each
//! variant gets a snake-case constructor taking `impl Into<FieldType>`, which
//! lets adapters pass the constructor straight to `map_err`.

macro_rules! define_port_error {
    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident { $field:ident : $ty:ty } => $message:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant { $field: $ty },
            )+
        }

        impl $name {
            $(
                ::paste::paste! {
                    #[doc = concat!("Build [`", stringify!($name), "::", stringify!($variant), "`].")]
                    pub fn [<$variant:snake>]($field: impl Into<$ty>) -> Self {
                        Self::$variant { $field: $field.into() }
                    }
                }
            )+
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    define_port_error! {
        pub enum BrokerError {
            Unreachable { message: String } => "broker unreachable: {message}",
            Stalled { millis: u64 } => "broker stalled for {millis}ms",
        }
    }

    #[test]
    fn message_constructor_accepts_str() {
        let err = BrokerError::unreachable("refused");
        assert_eq!(err, BrokerError::Unreachable { message: "refused".to_owned() });
        assert_eq!(err.to_string(), "broker unreachable: refused");
    }

    #[test]
    fn numeric_fields_keep_their_type() {
        assert_eq!(BrokerError::stalled(250_u64).to_string(), "broker stalled for 250ms");
    }

    #[test]
    fn constructors_work_as_map_err_targets() {
        let result: Result<(), String> = Err("timeout".to_owned());
        let err = result.map_err(BrokerError::unreachable).expect_err("mapped");
        assert!(matches!(err, BrokerError::Unreachable { .. }));
    }
}
