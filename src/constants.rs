// src/constants.rs

/// The configuration subdirectory searched under the working and home directories.
pub const DEFAULT_CONF_DIR: &str = "snowflake_ai/conf";

/// The name of the configuration file bundled with the library.
pub const DEFAULT_CONF_FILE: &str = "app_config.toml";

/// Environment variable naming a custom configuration directory.
pub const CONF_DIR_ENV: &str = "SNOWFLAKE_AI_CONF_DIR";

/// Extension (case-insensitive) of the files merged into the configuration tree.
pub const TOML_EXTENSION: &str = "toml";

/// Substring marking a group or key as the preferred default.
pub const DEFAULT_MARKER: &str = "default";

/// Suffix marking the first positional entry of a section (e.g. `snowflake_0`).
pub const POSITIONAL_MARKER: &str = "_0";

// --- Keys shared by application and connection entries ---

pub const K_NAME: &str = "name";
pub const K_TYPE: &str = "type";
pub const K_ROOT_PATH: &str = "root_path";
pub const K_VERSION: &str = "version";
pub const K_ENVIRONMENT: &str = "environment";
pub const K_APP_DIR: &str = "app_dir";
pub const K_SCRIPT_HOME_DIR: &str = "script_home_dir";
pub const K_AUTH_TYPE: &str = "auth_type";
pub const K_INIT_LIST: &str = "init_list";
pub const K_STEPS: &str = "steps";

/// Group under `app_connects` holding OAuth grant-flow definitions.
pub const K_OAUTH_CONNECTS: &str = "oauth_connects";

/// Group under `app_connects` holding data connection definitions.
pub const K_DATA_CONNECTS: &str = "data_connects";

/// Key of a data connect naming the OAuth connect it acquires tokens from.
pub const K_OAUTH_CONNECT_REF: &str = "oauth_connect";

/// Key of a data setup naming the data connect it runs against.
pub const K_DATA_CONNECT_REF: &str = "data_connect";

/// Prefix of data setup keys naming Snowflake stages.
pub const STAGE_KEY_PREFIX: &str = "stage";

/// Query used to check that a shared Snowflake session is still usable.
pub const LIVENESS_PROBE_QUERY: &str = "select current_role()";

/// Default body encoding of OAuth requests.
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Environment variable consulted when an OAuth connect names no secret variable.
pub const DEFAULT_CLIENT_SECRET_ENV: &str = "SNOWFLAKE_DEFAULT_APP_SECRET";

/// Device-code polling interval used when the server does not send one.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Extra delay the device-code flow adds after a `slow_down` answer.
pub const SLOW_DOWN_INCREMENT_SECS: u64 = 5;
