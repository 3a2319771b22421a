//! Substring-based user agent classification

use serde::Serialize;

const MOBILE_KEYWORDS: [&str; 6] = ["mobile", "iphone", "ipod", "windows phone", "blackberry", "opera mini"];
const TABLET_KEYWORDS: [&str; 5] = ["ipad", "tablet", "android", "kindle", "silk"];
const BOT_KEYWORDS: [&str; 7] = ["bot", "crawler", "spider", "slurp", "curl", "wget", "headless"];

/// Browser family in classification precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Browser {
    Chrome,
    Safari,
    Firefox,
    Edge,
    Other,
}

impl Browser {
    pub fn classify(user_agent: &str) -> Self {
        let is_edge = user_agent.contains("Edg");
        let is_chrome = user_agent.contains("Chrome");

        if is_chrome && !is_edge {
            Browser::Chrome
        } else if user_agent.contains("Safari") && !is_chrome {
            Browser::Safari
        } else if user_agent.contains("Firefox") {
            Browser::Firefox
        } else if is_edge {
            Browser::Edge
        } else {
            Browser::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "Chrome",
            Browser::Safari => "Safari",
            Browser::Firefox => "Firefox",
            Browser::Edge => "Edge",
            Browser::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Device {
    Mobile,
    Tablet,
    Bot,
    Desktop,
}

impl Device {
    /// Mobile keywords win over tablet, tablet over bot; anything else is desktop
    pub fn classify(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        let has_any = |keywords: &[&str]| keywords.iter().any(|k| ua.contains(k));

        if has_any(&MOBILE_KEYWORDS) {
            Device::Mobile
        } else if has_any(&TABLET_KEYWORDS) {
            Device::Tablet
        } else if has_any(&BOT_KEYWORDS) {
            Device::Bot
        } else {
            Device::Desktop
        }
    }
}

/// Device counts; every bucket is always reported, even at zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceBreakdown {
    #[serde(rename = "Mobile")]
    pub mobile: u64,
    #[serde(rename = "Tablet")]
    pub tablet: u64,
    #[serde(rename = "Bot")]
    pub bot: u64,
    #[serde(rename = "Desktop")]
    pub desktop: u64,
}

impl DeviceBreakdown {
    pub fn record(&mut self, device: Device) {
        match device {
            Device::Mobile => self.mobile += 1,
            Device::Tablet => self.tablet += 1,
            Device::Bot => self.bot += 1,
            Device::Desktop => self.desktop += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.mobile + self.tablet + self.bot + self.desktop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const EDGE: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const SAFARI_IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/604.1";
    const FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
    const GOOGLEBOT: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

    #[test]
    fn test_browser_precedence() {
        assert_eq!(Browser::classify(CHROME), Browser::Chrome);
        assert_eq!(Browser::classify(EDGE), Browser::Edge);
        assert_eq!(Browser::classify(SAFARI_IPHONE), Browser::Safari);
        assert_eq!(Browser::classify(FIREFOX), Browser::Firefox);
        assert_eq!(Browser::classify(GOOGLEBOT), Browser::Other);
    }

    #[test]
    fn test_device_precedence() {
        assert_eq!(Device::classify(CHROME), Device::Desktop);
        assert_eq!(Device::classify(SAFARI_IPHONE), Device::Mobile);
        assert_eq!(Device::classify(SAFARI_IPAD), Device::Tablet);
        assert_eq!(Device::classify(GOOGLEBOT), Device::Bot);
    }

    #[test]
    fn test_breakdown_serializes_all_buckets() {
        let mut breakdown = DeviceBreakdown::default();
        breakdown.record(Device::Mobile);

        let json = serde_json::to_value(breakdown).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 4);
        for key in ["Mobile", "Tablet", "Bot", "Desktop"] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(json["Mobile"], 1);
        assert_eq!(json["Bot"], 0);
    }
}
