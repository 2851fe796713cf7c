//! Runtime configuration.

/// Configuration of the deep-mutation [`Resolver`](crate::mutation::Resolver).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// The maximum number of distinct input objects a single mutation may create.
    pub node_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { node_limit: 100 }
    }
}

#[cfg(feature = "postgres")]
pub use postgres::{ConfigError, PostgresOptions};

#[cfg(feature = "postgres")]
mod postgres {
    use crate::sql::db::postgres::Config;
    use clap::Parser;
    use snafu::Snafu;
    use url::Url;

    /// Errors in PostgreSQL connection options.
    #[derive(Clone, Debug, PartialEq, Eq, Snafu)]
    pub enum ConfigError {
        #[snafu(display("database URL {url} has no host"))]
        MissingHost { url: Url },
    }

    /// Options for connecting to a PostgreSQL database.
    #[derive(Clone, Debug, Parser)]
    pub struct PostgresOptions {
        #[clap(
            long,
            env = "DEEP_GRAPHQL_POSTGRES_URL",
            default_value = "http://localhost:5432"
        )]
        pub db_url: Url,
        #[clap(long, env = "DEEP_GRAPHQL_POSTGRES_USER", default_value = "postgres")]
        pub db_user: String,
        #[clap(long, env = "DEEP_GRAPHQL_POSTGRES_PASSWORD", default_value = "password")]
        pub db_password: String,
        /// The database to connect to, if different from the user name.
        #[clap(long, env = "DEEP_GRAPHQL_POSTGRES_DB")]
        pub db_name: Option<String>,
    }

    impl PostgresOptions {
        /// Connection parameters for [`Connection::new`](crate::sql::db::postgres::Connection::new).
        pub fn config(&self) -> Result<Config, ConfigError> {
            let host = self.db_url.host_str().ok_or_else(|| ConfigError::MissingHost {
                url: self.db_url.clone(),
            })?;

            let mut config = Config::default();
            config
                .user(&self.db_user)
                .password(&self.db_password)
                .host(host);
            if let Some(port) = self.db_url.port() {
                config.port(port);
            }
            if let Some(name) = &self.db_name {
                config.dbname(name);
            }
            Ok(config)
        }
    }

}
