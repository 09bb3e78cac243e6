use strum::{Display, EnumString, IntoStaticStr};

#[derive(Clone, Debug, PartialEq, Eq, EnumString, Display, IntoStaticStr)]
pub enum SourceType {
    #[strum(serialize = "mysql")]
    Mysql,
    #[strum(serialize = "mariadb")]
    Mariadb,
}

impl Default for SourceType {
    fn default() -> Self {
        SourceType::Mysql
    }
}
