pub struct SqlUtil {}

impl SqlUtil {
    pub fn escape(identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    pub fn escape_table(schema: &str, tb: &str) -> String {
        format!("{}.{}", Self::escape(schema), Self::escape(tb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(SqlUtil::escape("books"), "`books`");
        assert_eq!(SqlUtil::escape("we`ird"), "`we``ird`");
        assert_eq!(SqlUtil::escape_table("app", "books"), "`app`.`books`");
    }
}
