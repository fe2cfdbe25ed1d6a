//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

/// Unpack the tuple or struct fields from an enum variant, panicking with the
/// offending variant if the value does not match. Each extracted binding is
/// declared mutable for flexibility in tests.
#[macro_export]
macro_rules! unpack_enum {
    ($($enum_key:ident)::+ { .. } = $enum:expr) => {
        match $enum {
            $($enum_key)::+{..} => (),
            v => panic!("Unexpected enum variant '{:?}' given to unpack_enum", v),
        }
    };
    ($($enum_key:ident)::+ { $($idents:tt),* } = $enum:expr) => {
        let ($(mut $idents),+) = match $enum {
            $($enum_key)::+{$($idents),+} => ($($idents),+),
            v => panic!("Unexpected enum variant '{:?}' given to unpack_enum", v),
        };
    };
    ($($enum_key:ident)::+ ( $($idents:tt),* ) = $enum:expr) => {
        let ($(mut $idents),+) = match $enum {
            $($enum_key)::+($($idents),+) => ($($idents),+),
            v => panic!("Unexpected enum variant '{:?}' given to unpack_enum", v),
        };
    };
    ($($enum_key:ident)::+ = $enum:expr) => {
        match $enum {
            $($enum_key)::+ => {},
            v => panic!("Unexpected enum variant '{:?}' given to unpack_enum", v),
        };
    };
}
