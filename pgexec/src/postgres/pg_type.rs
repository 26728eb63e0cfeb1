
/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

/// Well known type oids.
///
/// Only the types the binary format defaults refer to are listed; any other oid can still be
/// used with the registry directly.
pub mod oid {
    use super::Oid;

    macro_rules! oid {
        ($($name:ident = $oid:literal, $doc:literal;)*) => {$(
            #[doc = $doc]
            pub const $name: Oid = $oid;
        )*};
    }

    oid! {
        UNSPECIFIED = 0, "type unspecified, let the server infer it";
        BOOL = 16, "`bool` boolean, 'true'/'false'";
        BYTEA = 17, "`bytea` variable-length string, binary values escaped";
        INT8 = 20, "`int8` ~18 digit integer, 8-byte storage";
        INT2 = 21, "`int2` -32 thousand to 32 thousand, 2-byte storage";
        INT4 = 23, "`int4` -2 billion to 2 billion integer, 4-byte storage";
        TEXT = 25, "`text` variable-length string, no limit specified";
        OID = 26, "`oid` object identifier(oid), maximum 4 billion";
        FLOAT4 = 700, "`float4` single-precision floating point number, 4-byte storage";
        FLOAT8 = 701, "`float8` double-precision floating point number, 8-byte storage";
        VARCHAR = 1043, "`varchar` variable-length string with limit";
        DATE = 1082, "`date` date";
        TIME = 1083, "`time` time of day";
        TIMESTAMP = 1114, "`timestamp` date and time";
        TIMESTAMPTZ = 1184, "`timestamptz` date and time with timezone";
        UUID = 2950, "`uuid` UUID datatype";
        VOID = 2278, "`void` pseudo-type for functions returning no value";
    }

    /// Sql type name usable in a `::type` cast, for the oids listed here.
    pub fn type_name(oid: Oid) -> Option<&'static str> {
        let name = match oid {
            BOOL => "bool",
            BYTEA => "bytea",
            INT8 => "int8",
            INT2 => "int2",
            INT4 => "int4",
            TEXT => "text",
            OID => "oid",
            FLOAT4 => "float4",
            FLOAT8 => "float8",
            VARCHAR => "varchar",
            DATE => "date",
            TIME => "time",
            TIMESTAMP => "timestamp",
            TIMESTAMPTZ => "timestamptz",
            UUID => "uuid",
            _ => return None,
        };
        Some(name)
    }
}
