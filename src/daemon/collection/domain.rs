use tracing::debug;
use url::Url;

use crate::daemon::storage::entities::DomainKey;

const NETWORK_SCHEMES: [&str; 5] = ["http", "https", "ftp", "ws", "wss"];

/// Maps a page address to the domain its time is attributed to. Internal browser pages,
/// local files and anything unparsable resolve to `None`, which simply means "not tracked".
pub fn extract(address: &str) -> Option<DomainKey> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }

    let url = match Url::parse(address) {
        Ok(url) => url,
        Err(e) => {
            debug!("Address {address:?} is not attributable: {e}");
            return None;
        }
    };

    if !NETWORK_SCHEMES.contains(&url.scheme()) {
        return None;
    }

    url.host_str()
        .filter(|host| !host.is_empty())
        .map(|host| DomainKey::new(host.to_ascii_lowercase()))
}

/// Same as [extract] for addresses that may be absent altogether.
pub fn extract_opt(address: Option<&str>) -> Option<DomainKey> {
    address.and_then(extract)
}
