// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    network::config::TcpConfig,
};
use ::std::{
    fs::File,
    io::Read,
    net::Ipv4Addr,
    ops::Index,
    str::FromStr,
    time::Duration,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Global network stack options.
mod global_config {
    pub const SECTION_NAME: &str = "ikos";
    // Local IPv4 addr.
    pub const LOCAL_IPV4_ADDR: &str = "local_ipv4_addr";
}

// Default TCP socket options. These apply to every new connection.
mod tcp_socket_options {
    pub const SECTION_NAME: &str = "tcp_socket_options";
    pub const KEEP_ALIVE: &str = "keepalive";
    pub const NO_DELAY: &str = "nodelay";
}

// TCP engine configuration.
mod tcp_config {
    pub const SECTION_NAME: &str = "tcp_config";
    pub const MSS: &str = "mss";
    pub const RECEIVE_WINDOW_SIZE: &str = "receive_window_size";
    pub const SEND_BUFFER_SIZE: &str = "send_buffer_size";
    pub const INITIAL_RTO: &str = "initial_rto_millis";
    pub const MAX_RETRIES: &str = "max_retries";
    pub const MSL: &str = "msl_seconds";
    pub const INITIAL_SSTHRESH: &str = "initial_ssthresh";
    pub const RX_CHECKSUM_OFFLOAD: &str = "rx_checksum_offload";
    pub const TX_CHECKSUM_OFFLOAD: &str = "tx_checksum_offload";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Network stack configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Common associated functions for the configuration object.
impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::from_yaml_str(&config_s)
    }

    /// Parses a configuration from a YAML document.
    pub fn from_yaml_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration: {:?}", e);
                error!("from_yaml_str(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        let config_obj: &Yaml = match &config[..] {
            &[ref c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        };

        Ok(Self(config_obj.clone()))
    }

    /// Global config: Reads the local IPv4 address parameter from the environment variable first and then the
    /// underlying configuration file.
    pub fn local_ipv4_addr(&self) -> Result<Ipv4Addr, Fail> {
        let local_ipv4_addr: Ipv4Addr = if let Some(addr) = Self::get_typed_env_option(global_config::LOCAL_IPV4_ADDR)?
        {
            addr
        } else {
            Self::get_typed_str_option(
                Self::get_subsection(&self.0, global_config::SECTION_NAME)?,
                global_config::LOCAL_IPV4_ADDR,
                |val: &str| val.parse().ok(),
            )?
        };

        if local_ipv4_addr.is_unspecified() || local_ipv4_addr.is_broadcast() {
            let cause: &str = "invalid local IPv4 address";
            error!("local_ipv4_addr(): {} ({})", cause, local_ipv4_addr);
            return Err(Fail::new(libc::EINVAL, cause));
        }
        Ok(local_ipv4_addr)
    }

    /// Builds the TCP configuration descriptor. Options that are not present keep their default values.
    pub fn tcp_config(&self) -> Result<TcpConfig, Fail> {
        let mut config: TcpConfig = TcpConfig::default();

        if let Some(section) = Self::find_subsection(&self.0, tcp_config::SECTION_NAME)? {
            if let Some(mss) = Self::find_int_option::<usize>(section, tcp_config::MSS)? {
                config = config.set_mss(mss);
            }
            if let Some(size) = Self::find_int_option::<u16>(section, tcp_config::RECEIVE_WINDOW_SIZE)? {
                config = config.set_receive_window_size(Self::require_nonzero(size, tcp_config::RECEIVE_WINDOW_SIZE)?);
            }
            if let Some(size) = Self::find_int_option::<usize>(section, tcp_config::SEND_BUFFER_SIZE)? {
                config = config.set_send_buffer_size(Self::require_nonzero(size, tcp_config::SEND_BUFFER_SIZE)?);
            }
            if let Some(rto) = Self::find_int_option::<u64>(section, tcp_config::INITIAL_RTO)? {
                config = config.set_initial_rto(Duration::from_millis(rto));
            }
            if let Some(retries) = Self::find_int_option::<usize>(section, tcp_config::MAX_RETRIES)? {
                config = config.set_max_retries(Self::require_nonzero(retries, tcp_config::MAX_RETRIES)?);
            }
            if let Some(msl) = Self::find_int_option::<u64>(section, tcp_config::MSL)? {
                config = config.set_msl(Duration::from_secs(msl));
            }
            if let Some(ssthresh) = Self::find_int_option::<u32>(section, tcp_config::INITIAL_SSTHRESH)? {
                config = config.set_initial_ssthresh(ssthresh);
            }
            if let Some(offload) = Self::find_bool_option(section, tcp_config::RX_CHECKSUM_OFFLOAD)? {
                config = config.set_rx_checksum_offload(offload);
            }
            if let Some(offload) = Self::find_bool_option(section, tcp_config::TX_CHECKSUM_OFFLOAD)? {
                config = config.set_tx_checksum_offload(offload);
            }
        }

        config = config.set_nodelay(self.no_delay()?);
        let (enabled, time, interval, probes) = self.tcp_keepalive()?;
        Ok(config.set_keepalive(enabled, time, interval, probes))
    }

    /// Tcp socket option: Reads the setting to enable or disable Nagle's algorithm.
    pub fn no_delay(&self) -> Result<bool, Fail> {
        if let Some(nodelay) = Self::get_typed_env_option(tcp_socket_options::NO_DELAY)? {
            return Ok(nodelay);
        }
        match Self::find_subsection(&self.0, tcp_socket_options::SECTION_NAME)? {
            Some(section) => Ok(Self::find_bool_option(section, tcp_socket_options::NO_DELAY)?.unwrap_or(false)),
            None => Ok(false),
        }
    }

    /// Tcp socket option: Reads keepalive settings from the "keepalive" subsection.
    pub fn tcp_keepalive(&self) -> Result<(bool, Option<Duration>, Option<Duration>, Option<usize>), Fail> {
        let options: &Yaml = match Self::find_subsection(&self.0, tcp_socket_options::SECTION_NAME)? {
            Some(options) => options,
            None => return Ok((false, None, None, None)),
        };
        let section: &Yaml = match Self::find_subsection(options, tcp_socket_options::KEEP_ALIVE)? {
            Some(section) => section,
            None => return Ok((false, None, None, None)),
        };
        let enabled: bool = Self::find_bool_option(section, "enabled")?.unwrap_or(false);
        let time: Option<Duration> = Self::find_int_option::<u64>(section, "time_millis")?
            .map(|ms| Self::require_nonzero(ms, "time_millis"))
            .transpose()?
            .map(Duration::from_millis);
        let interval: Option<Duration> = Self::find_int_option::<u64>(section, "interval_millis")?
            .map(|ms| Self::require_nonzero(ms, "interval_millis"))
            .transpose()?
            .map(Duration::from_millis);
        let probes: Option<usize> = Self::find_int_option::<usize>(section, "probes")?;
        Ok((enabled, time, interval, probes))
    }

    //======================================================================================================================
    // Static Functions
    //======================================================================================================================

    /// Similar to `get_option`, but checks that the value is a section.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match Self::find_subsection(yaml, index)? {
            Some(section) => Ok(section),
            None => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Looks up an optional section.
    fn find_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<Option<&'a Yaml>, Fail> {
        match Self::find_option(yaml, index) {
            Some(section @ Yaml::Hash(_)) => Ok(Some(section)),
            Some(_) => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
            None => Ok(None),
        }
    }

    /// Index `yaml` to find the value at `index`.
    fn find_option<'a>(yaml: &'a Yaml, index: &str) -> Option<&'a Yaml> {
        match yaml.index(index) {
            Yaml::BadValue => None,
            value => Some(value),
        }
    }

    /// Index `yaml` to find value at `index`, validating it as a string.
    fn get_typed_str_option<T, Fn>(yaml: &Yaml, index: &str, parser: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&str) -> Option<T>,
    {
        if let Some(value) = Self::find_option(yaml, index).and_then(|option| option.as_str()) {
            if let Some(value) = parser(value) {
                return Ok(value);
            }
        }
        let message: String = format!("parameter {} has unexpected type", index);
        Err(Fail::new(libc::EINVAL, message.as_str()))
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        // Check for the environment variable.
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Looks up an optional integer, verifying that the destination type may hold the i64 value. The environment
    /// variable named after the option takes precedence.
    fn find_int_option<T: TryFrom<i64> + FromStr>(yaml: &Yaml, index: &str) -> Result<Option<T>, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(Some(value));
        }
        let val: i64 = match Self::find_option(yaml, index) {
            Some(option) => match option.as_i64() {
                Some(val) => val,
                None => {
                    let message: String = format!("parameter {} has unexpected type", index);
                    return Err(Fail::new(libc::EINVAL, message.as_str()));
                },
            },
            None => return Ok(None),
        };
        match T::try_from(val) {
            Ok(val) => Ok(Some(val)),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    /// Same as `find_int_option` for booleans.
    fn find_bool_option(yaml: &Yaml, index: &str) -> Result<Option<bool>, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(Some(value));
        }
        match Self::find_option(yaml, index) {
            Some(option) => match option.as_bool() {
                Some(value) => Ok(Some(value)),
                None => {
                    let message: String = format!("parameter {} has unexpected type", index);
                    Err(Fail::new(libc::EINVAL, message.as_str()))
                },
            },
            None => Ok(None),
        }
    }

    /// Rejects zero for options where zero makes no sense.
    fn require_nonzero<T: Default + PartialEq>(value: T, index: &str) -> Result<T, Fail> {
        if value == T::default() {
            let message: String = format!("parameter \"{}\" must not be zero", index);
            return Err(Fail::new(libc::ERANGE, message.as_str()));
        }
        Ok(value)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
