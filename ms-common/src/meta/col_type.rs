/// Logical column type. ENUM/SET carry their ordered value tables so row
/// decoding never goes back to the database.
#[derive(Clone, Debug, PartialEq)]
pub enum ColType {
    Tiny,
    Short,
    Long,
    LongLong,
    Float,
    Double,
    Decimal,
    Time,
    Date,
    DateTime,
    Timestamp,
    Year,
    String,
    Blob,
    Bit,
    Set { values: Vec<String> },
    Enum { values: Vec<String> },
    Json,
    Unknown,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub col_type: ColType,
}

impl ColType {
    /// Maps information_schema (DATA_TYPE, COLUMN_TYPE) to a logical type.
    pub fn from_mysql(data_type: &str, column_type: &str) -> ColType {
        match data_type.to_lowercase().as_str() {
            "tinyint" => ColType::Tiny,
            "smallint" => ColType::Short,
            "mediumint" | "int" => ColType::Long,
            "bigint" => ColType::LongLong,
            "float" => ColType::Float,
            "double" => ColType::Double,
            "decimal" => ColType::Decimal,
            "time" => ColType::Time,
            "date" => ColType::Date,
            "datetime" => ColType::DateTime,
            "timestamp" => ColType::Timestamp,
            "year" => ColType::Year,
            "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" => ColType::String,
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                ColType::Blob
            }
            "bit" => ColType::Bit,
            "enum" => ColType::Enum {
                values: parse_value_list(column_type),
            },
            "set" => ColType::Set {
                values: parse_value_list(column_type),
            },
            "json" => ColType::Json,
            _ => ColType::Unknown,
        }
    }
}

/// Extracts the quoted value table from a COLUMN_TYPE like
/// `enum('draft','published')` or `set('a','b''c')`.
fn parse_value_list(column_type: &str) -> Vec<String> {
    let inner = match (column_type.find('('), column_type.rfind(')')) {
        (Some(start), Some(end)) if start < end => &column_type[start + 1..end],
        _ => return Vec::new(),
    };

    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' if in_quotes => {
                // doubled quote is an escaped quote inside a value
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    current.push('\'');
                } else {
                    in_quotes = false;
                    values.push(std::mem::take(&mut current));
                }
            }
            '\'' => in_quotes = true,
            _ if in_quotes => current.push(c),
            _ => {}
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_mysql_scalar_types() {
        assert_eq!(ColType::from_mysql("INT", "int(11)"), ColType::Long);
        assert_eq!(ColType::from_mysql("bigint", "bigint unsigned"), ColType::LongLong);
        assert_eq!(ColType::from_mysql("varchar", "varchar(255)"), ColType::String);
        assert_eq!(ColType::from_mysql("datetime", "datetime(6)"), ColType::DateTime);
        assert_eq!(ColType::from_mysql("json", "json"), ColType::Json);
        assert_eq!(ColType::from_mysql("geometry", "geometry"), ColType::Unknown);
    }

    #[test]
    fn test_parse_enum_values() {
        let col_type = ColType::from_mysql("enum", "enum('draft','published','archived')");
        assert_eq!(
            col_type,
            ColType::Enum {
                values: vec!["draft".into(), "published".into(), "archived".into()]
            }
        );
    }

    #[test]
    fn test_parse_set_values_with_escaped_quote() {
        let col_type = ColType::from_mysql("set", "set('a','b''c','d,e')");
        assert_eq!(
            col_type,
            ColType::Set {
                values: vec!["a".into(), "b'c".into(), "d,e".into()]
            }
        );
    }

    #[test]
    fn test_parse_value_list_malformed() {
        assert_eq!(ColType::from_mysql("enum", "enum"), ColType::Enum { values: vec![] });
        assert_eq!(ColType::from_mysql("set", "set()"), ColType::Set { values: vec![] });
    }
}
