pub mod sql_util;
pub mod table_filter;
