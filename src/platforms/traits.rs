use crate::element::{ElementDescriptor, ProximityQuery};
use crate::workflow::request::PostKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub id: String,
    pub name: String,
    pub login_url: String,
    /// Substring every page of the site carries in its URL.
    pub host: String,
}

/// One step inside a settings dialog.
#[derive(Debug, Clone)]
pub enum DialogAction {
    Click(ElementDescriptor),
    /// Clicked when it shows up within the optional timeout; skipped otherwise.
    ClickIfPresent(ElementDescriptor),
    /// Click the entry whose text equals the caller's choice, e.g. a
    /// collection name. Matching runs over elements of `scope`.
    ChooseByText { scope: String },
}

/// Label-driven settings row: find the value next to the label, open its
/// dialog, work through it, confirm.
#[derive(Debug, Clone)]
pub struct FlagFlow {
    pub name: String,
    pub value: ProximityQuery,
    pub dialog: Vec<DialogAction>,
    pub confirm: ElementDescriptor,
}

#[derive(Debug, Clone)]
pub struct CoverFlow {
    pub entry: ElementDescriptor,
    pub picker_entry: ElementDescriptor,
    pub file_input: ElementDescriptor,
    pub library_item: ElementDescriptor,
    /// Crop step; not every account gets one.
    pub next: ElementDescriptor,
    pub confirm: ElementDescriptor,
}

#[derive(Debug, Clone)]
pub struct EditorFields {
    pub title: ElementDescriptor,
    pub author: ElementDescriptor,
    pub summary: ElementDescriptor,
    pub article_body: ElementDescriptor,
    pub image_text_body: ElementDescriptor,
    pub article_image_input: ElementDescriptor,
    pub image_text_image_input: ElementDescriptor,
}

impl EditorFields {
    pub fn body(&self, kind: PostKind) -> &ElementDescriptor {
        match kind {
            PostKind::Article => &self.article_body,
            PostKind::ImageText => &self.image_text_body,
        }
    }

    pub fn image_input(&self, kind: PostKind) -> &ElementDescriptor {
        match kind {
            PostKind::Article => &self.article_image_input,
            PostKind::ImageText => &self.image_text_image_input,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitControls {
    pub save: ElementDescriptor,
    pub saved_marker: ElementDescriptor,
    pub publish: ElementDescriptor,
    pub publish_confirm: ElementDescriptor,
    pub published_marker: ElementDescriptor,
    pub published_url_markers: Vec<String>,
}

/// Everything the workflow needs to know about one site's markup.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub info: PlatformInfo,
    /// All of these must appear in the URL once the user is logged in.
    pub logged_in_url_markers: Vec<String>,
    pub editor_url_marker: String,
    pub editor_url_base: String,
    pub fields: EditorFields,
    pub cover: CoverFlow,
    pub original: FlagFlow,
    pub reward: FlagFlow,
    pub collection: FlagFlow,
    pub submit: SubmitControls,
}

impl SiteProfile {
    pub fn is_logged_in_url(&self, url: &str) -> bool {
        url.contains(&self.info.host)
            && self
                .logged_in_url_markers
                .iter()
                .all(|marker| url.contains(marker.as_str()))
    }

    pub fn is_editor_url(&self, url: &str) -> bool {
        url.contains(&self.editor_url_marker)
    }

    pub fn editor_url(&self, token: &str, kind: PostKind) -> String {
        format!(
            "{}&type={}&token={}&lang=zh_CN",
            self.editor_url_base,
            kind.editor_type(),
            token
        )
    }
}

/// Value of the `token` query parameter, if present and non-empty.
pub fn extract_token(url: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
