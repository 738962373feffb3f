use serde::Serialize;
use std::fmt;

use crate::url_canon::CanonicalUrl;

/// Extensions served as pages; the path mapper rewrites them to `.html`.
pub const PAGE_EXTENSIONS: &[&str] = &["html", "htm", "xhtml", "shtml", "php", "asp", "aspx", "jsp", "cfm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceCategory {
    HtmlPage,
    Stylesheet,
    Script,
    Image,
    Font,
    UploadedMedia,
    OtherBinary,
}

impl ResourceCategory {
    /// Category of a URL from its path alone.
    ///
    /// Anything under `<content_dir>/uploads/` is uploaded media whatever its
    /// extension. Otherwise a recognized asset extension decides, then the
    /// `hint` taken from the referencing element, then `OtherBinary`.
    pub fn classify(url: &CanonicalUrl, content_dir: &str, hint: Option<Self>) -> Self {
        if uploads_suffix(url, content_dir).is_some() {
            return Self::UploadedMedia;
        }

        url.file_name()
            .and_then(extension)
            .and_then(|ext| Self::from_extension(&ext))
            .or(hint)
            .unwrap_or(Self::OtherBinary)
    }

    /// Asset category for an extension; page-like and unknown extensions yield `None`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "woff" | "woff2" | "ttf" | "otf" | "eot" => return Some(Self::Font),
            "js" | "mjs" => return Some(Self::Script),
            _ => {}
        }

        let guess = mime_guess::from_ext(ext).first()?;
        Self::from_mime_parts(guess.type_(), guess.subtype())
    }

    /// Category of a fetched non-HTML body from its `Content-Type`.
    pub fn from_content_type(content_type: &str) -> Self {
        content_type
            .parse::<mime::Mime>()
            .ok()
            .and_then(|m| Self::from_mime_parts(m.type_(), m.subtype()))
            .unwrap_or(Self::OtherBinary)
    }

    fn from_mime_parts(type_: mime::Name<'_>, subtype: mime::Name<'_>) -> Option<Self> {
        if type_ == mime::IMAGE {
            Some(Self::Image)
        } else if type_ == mime::FONT {
            Some(Self::Font)
        } else if type_ == mime::TEXT && subtype == mime::CSS {
            Some(Self::Stylesheet)
        } else if subtype == mime::JAVASCRIPT && (type_ == mime::TEXT || type_ == mime::APPLICATION) {
            Some(Self::Script)
        } else {
            None
        }
    }

    /// Directory under the mirror root for flattened categories.
    pub fn directory(&self) -> &'static str {
        match self {
            Self::HtmlPage => "",
            Self::Stylesheet => "styles",
            Self::Script => "scripts",
            Self::Image => "images",
            Self::Font => "fonts",
            Self::UploadedMedia => "uploads",
            Self::OtherBinary => "files",
        }
    }

    /// Extension appended to flattened file names that have none.
    pub fn default_extension(&self) -> Option<&'static str> {
        match self {
            Self::Stylesheet => Some("css"),
            Self::Script => Some("js"),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HtmlPage => "html-page",
            Self::Stylesheet => "stylesheet",
            Self::Script => "script",
            Self::Image => "image",
            Self::Font => "font",
            Self::UploadedMedia => "uploaded-media",
            Self::OtherBinary => "other-binary",
        }
    }

    /// Whether image dimensions are worth probing for the metadata sidecar.
    pub fn may_be_image(&self) -> bool {
        matches!(self, Self::Image | Self::UploadedMedia)
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-cased extension of a file name, if it has one.
pub fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn is_page_extension(ext: &str) -> bool {
    PAGE_EXTENSIONS.contains(&ext)
}

/// The part of the path after `<content_dir>/uploads/`, when the URL lives there.
pub fn uploads_suffix<'a>(url: &'a CanonicalUrl, content_dir: &str) -> Option<&'a str> {
    let content_dir = content_dir.trim_matches('/');
    if content_dir.is_empty() {
        return None;
    }

    let marker = format!("/{}/uploads/", content_dir);
    let path = url.path();
    let start = path.find(&marker)? + marker.len();
    let rest = &path[start..];
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(raw: &str) -> CanonicalUrl {
        CanonicalUrl::parse(raw)
    }

    #[test]
    fn test_classify_by_extension() {
        let cases = [
            ("https://ex.com/style.css", ResourceCategory::Stylesheet),
            ("https://ex.com/js/app.js?v=3", ResourceCategory::Script),
            ("https://ex.com/logo.PNG", ResourceCategory::Image),
            ("https://ex.com/icons/sprite.svg", ResourceCategory::Image),
            ("https://ex.com/fonts/inter.woff2", ResourceCategory::Font),
            ("https://ex.com/brochure.pdf", ResourceCategory::OtherBinary),
        ];

        for (url, expected) in cases {
            assert_eq!(
                ResourceCategory::classify(&canon(url), "wp-content", None),
                expected,
                "url {}",
                url
            );
        }
    }

    #[test]
    fn test_uploads_win_over_extension() {
        let url = canon("https://ex.com/wp-content/uploads/2023/05/door.jpg");
        assert_eq!(
            ResourceCategory::classify(&url, "wp-content", Some(ResourceCategory::Image)),
            ResourceCategory::UploadedMedia
        );
        assert_eq!(uploads_suffix(&url, "wp-content"), Some("2023/05/door.jpg"));

        let elsewhere = canon("https://ex.com/uploads/door.jpg");
        assert_eq!(
            ResourceCategory::classify(&elsewhere, "wp-content", None),
            ResourceCategory::Image
        );
    }

    #[test]
    fn test_hint_used_without_known_extension() {
        let url = canon("https://ex.com/css?family=Inter");
        assert_eq!(
            ResourceCategory::classify(&url, "wp-content", Some(ResourceCategory::Stylesheet)),
            ResourceCategory::Stylesheet
        );

        let dynamic = canon("https://ex.com/thumb.php?id=4");
        assert_eq!(
            ResourceCategory::classify(&dynamic, "wp-content", Some(ResourceCategory::Image)),
            ResourceCategory::Image
        );
    }

    #[test]
    fn test_from_content_type() {
        assert_eq!(
            ResourceCategory::from_content_type("image/webp"),
            ResourceCategory::Image
        );
        assert_eq!(
            ResourceCategory::from_content_type("text/css; charset=utf-8"),
            ResourceCategory::Stylesheet
        );
        assert_eq!(
            ResourceCategory::from_content_type("application/pdf"),
            ResourceCategory::OtherBinary
        );
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("a.tar.GZ"), Some("gz".to_string()));
        assert_eq!(extension(".htaccess"), None);
        assert_eq!(extension("README"), None);
        assert!(is_page_extension("php"));
    }
}
