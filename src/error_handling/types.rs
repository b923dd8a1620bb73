use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    ServicesEmpty(String),
    BadAddressFormatting(String),
    UnknownDirector(String),
    DuplicateService(String),
    DuplicateTemplate(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::ServicesEmpty(e) => write!(f, "Services configuration error: {}", e),
            ConfigError::BadAddressFormatting(e) => write!(f, "Address formatting error: {}", e),
            ConfigError::UnknownDirector(e) => write!(f, "Unknown director: {}", e),
            ConfigError::DuplicateService(e) => write!(f, "Duplicate service: {}", e),
            ConfigError::DuplicateTemplate(e) => write!(f, "Duplicate naming template: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures of the director/container subsystem.
#[derive(Debug)]
pub enum DirectorError {
    /// The remote address could not be split into host and port.
    AddressParse(String),
    /// Lookup for a host that never had a container created.
    NotFound(String),
    /// The backend failed to create or start a sandbox.
    Provisioning(String),
    /// Dial attempted on a stopped container.
    ResourceUnavailable(String),
    /// The forwarding backend cannot dial this transport.
    UnsupportedProtocol(String),
    /// Placeholder backend.
    NotImplemented(String),
    /// The backend was provisioned but could not be reached.
    ConnectionFailed(String),
    /// Backend options could not be decoded.
    InvalidConfig(String),
}

impl fmt::Display for DirectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectorError::AddressParse(e) => write!(f, "Address parse error: {}", e),
            DirectorError::NotFound(e) => write!(f, "Container not found: {}", e),
            DirectorError::Provisioning(e) => write!(f, "Container provisioning failed: {}", e),
            DirectorError::ResourceUnavailable(e) => write!(f, "Container unavailable: {}", e),
            DirectorError::UnsupportedProtocol(e) => write!(f, "Unsupported protocol: {}", e),
            DirectorError::NotImplemented(e) => write!(f, "Not implemented: {}", e),
            DirectorError::ConnectionFailed(e) => write!(f, "Container connection failed: {}", e),
            DirectorError::InvalidConfig(e) => write!(f, "Invalid director configuration: {}", e),
        }
    }
}

impl std::error::Error for DirectorError {}

impl From<ProcessError> for DirectorError {
    fn from(err: ProcessError) -> Self {
        DirectorError::Provisioning(err.to_string())
    }
}

#[derive(Debug)]
pub enum ProcessError {
    Start(String, std::io::Error),
    Wait(String, std::io::Error),
    Cancelled(String),
    ExitStatus(String, String),
    Script(std::io::Error),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Start(cmd, e) => write!(f, "Unable to start {}: {}", cmd, e),
            ProcessError::Wait(cmd, e) => write!(f, "Unable to wait for {}: {}", cmd, e),
            ProcessError::Cancelled(cmd) => write!(f, "{} killed on cancellation", cmd),
            ProcessError::ExitStatus(cmd, status) => write!(f, "{} exited with {}", cmd, status),
            ProcessError::Script(e) => write!(f, "Unable to prepare script: {}", e),
        }
    }
}

impl std::error::Error for ProcessError {}

/// Failures while relaying a session.
#[derive(Debug)]
pub enum ProxyError {
    Io(std::io::Error),
    Malformed(String),
    Director(DirectorError),
    SessionLimitReached,
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Io(e) => write!(f, "Proxy IO error: {}", e),
            ProxyError::Malformed(e) => write!(f, "Malformed protocol exchange: {}", e),
            ProxyError::Director(e) => write!(f, "Director error: {}", e),
            ProxyError::SessionLimitReached => write!(f, "Session limit reached"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(err)
    }
}

impl From<DirectorError> for ProxyError {
    fn from(err: DirectorError) -> Self {
        ProxyError::Director(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(String, std::io::Error),
    ChannelFailed,
    SockError(std::io::Error),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(addr, e) => write!(f, "Network bind error on {}: {}", addr, e),
            NetworkError::ChannelFailed => write!(f, "Network channel failed"),
            NetworkError::SockError(e) => write!(f, "Socket error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    DirectorError(DirectorError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::DirectorError(e) => write!(f, "Director error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}

impl From<DirectorError> for ControllerError {
    fn from(err: DirectorError) -> Self {
        ControllerError::DirectorError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}
