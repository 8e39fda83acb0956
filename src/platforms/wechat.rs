use super::traits::{
    CoverFlow, DialogAction, EditorFields, FlagFlow, PlatformInfo, SiteProfile, SubmitControls,
};
use crate::config::MP_HOME_URL;
use crate::element::{ElementDescriptor, ProximityQuery};

pub const ID: &str = "wechat_mp";

pub fn info() -> PlatformInfo {
    PlatformInfo {
        id: ID.into(),
        name: "微信公众号".into(),
        login_url: MP_HOME_URL.into(),
        host: "mp.weixin.qq.com".into(),
    }
}

fn dialog_confirm() -> ElementDescriptor {
    ElementDescriptor::new("dialog confirm")
        .text(".weui-desktop-dialog button", "确定")
        .text("button", "确定")
}

fn fields() -> EditorFields {
    EditorFields {
        title: ElementDescriptor::new("title input")
            .css("#title")
            .attribute("textarea", "placeholder", "标题")
            .attribute("input", "placeholder", "标题"),
        author: ElementDescriptor::new("author input")
            .css("#author")
            .attribute("input", "placeholder", "作者"),
        summary: ElementDescriptor::new("summary input")
            .css("#js_description")
            .attribute("textarea", "placeholder", "摘要"),
        article_body: ElementDescriptor::new("article body")
            .css(".ProseMirror[contenteditable=\"true\"]")
            .css("#js_editor [contenteditable=\"true\"]")
            .css(".rich_media_content[contenteditable=\"true\"]"),
        image_text_body: ElementDescriptor::new("image-text body")
            .css(".share-text__input [contenteditable=\"true\"]")
            .attribute("[contenteditable=\"true\"]", "data-placeholder", "描述")
            .css("#guide_words_main [contenteditable=\"true\"]"),
        article_image_input: ElementDescriptor::new("article image input")
            .css("#js_editor_insertimage input[type=\"file\"]")
            .css("input[type=\"file\"][accept*=\"image\"]"),
        image_text_image_input: ElementDescriptor::new("image-text image input")
            .css(".image-selector input[type=\"file\"]")
            .css("input[type=\"file\"][accept*=\"image\"]"),
    }
}

fn cover() -> CoverFlow {
    CoverFlow {
        entry: ElementDescriptor::new("cover entry")
            .css(".js_cover_btn_area")
            .css("#js_cover_area .select-cover__btn")
            .text_contains("div", "拖拽或选择封面"),
        picker_entry: ElementDescriptor::new("cover picker entry")
            .text("a", "从图片库选择")
            .text_contains("li", "从图片库选择"),
        file_input: ElementDescriptor::new("cover file input")
            .css(".weui-desktop-dialog input[type=\"file\"]")
            .css("input[type=\"file\"][accept*=\"image\"]"),
        library_item: ElementDescriptor::new("cover library item")
            .css(".weui-desktop-img-picker__item")
            .css(".weui-desktop-dialog .img_item"),
        next: ElementDescriptor::new("cover next")
            .text(".weui-desktop-dialog button", "下一步")
            .text("button", "下一步"),
        confirm: ElementDescriptor::new("cover confirm")
            .text(".weui-desktop-dialog button", "确认")
            .text(".weui-desktop-dialog button", "完成"),
    }
}

fn original() -> FlagFlow {
    FlagFlow {
        name: "original".into(),
        value: ProximityQuery::new("原创", &["未声明", "未开启"]),
        dialog: vec![DialogAction::ClickIfPresent(
            ElementDescriptor::new("original agreement")
                .css(".original_agreement .weui-desktop-icon-checkbox")
                .text_contains("label", "我已阅读并同意"),
        )],
        confirm: dialog_confirm(),
    }
}

fn reward() -> FlagFlow {
    FlagFlow {
        name: "reward".into(),
        value: ProximityQuery::new("赞赏", &["不开启", "未开启"]),
        dialog: vec![DialogAction::ClickIfPresent(
            ElementDescriptor::new("reward account")
                .css(".reward-account__item")
                .text_contains("label", "赞赏账户"),
        )],
        confirm: dialog_confirm(),
    }
}

fn collection() -> FlagFlow {
    FlagFlow {
        name: "collection".into(),
        value: ProximityQuery::new("合集", &["未添加", "请选择合集"]),
        dialog: vec![DialogAction::ChooseByText {
            scope: ".weui-desktop-dialog li, .weui-desktop-dialog label".into(),
        }],
        confirm: dialog_confirm(),
    }
}

fn submit() -> SubmitControls {
    SubmitControls {
        save: ElementDescriptor::new("save draft")
            .css("#js_submit button")
            .text("button", "保存为草稿"),
        saved_marker: ElementDescriptor::new("saved marker")
            .text_contains("span", "已保存")
            .text_contains("div", "保存成功"),
        publish: ElementDescriptor::new("publish")
            .css("#js_send button")
            .text("button", "发表"),
        publish_confirm: ElementDescriptor::new("publish confirm")
            .text(".weui-desktop-dialog button", "发表")
            .text(".weui-desktop-dialog button", "继续发表"),
        published_marker: ElementDescriptor::new("published marker")
            .text_contains("div", "发表成功")
            .text_contains("p", "已发表"),
        published_url_markers: vec!["appmsgpublish".into()],
    }
}

/// Markup table for the WeChat MP back office.
pub fn mp_profile() -> SiteProfile {
    SiteProfile {
        info: info(),
        logged_in_url_markers: vec!["/cgi-bin/".into(), "token=".into()],
        editor_url_marker: "appmsg_edit".into(),
        editor_url_base: format!(
            "{}cgi-bin/appmsg?t=media/appmsg_edit_v2&action=edit&isNew=1",
            MP_HOME_URL
        ),
        fields: fields(),
        cover: cover(),
        original: original(),
        reward: reward(),
        collection: collection(),
        submit: submit(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::request::PostKind;

    #[test]
    fn login_detection_needs_cgi_path_and_token() {
        let profile = mp_profile();
        assert!(profile.is_logged_in_url(
            "https://mp.weixin.qq.com/cgi-bin/home?t=home/index&lang=zh_CN&token=99"
        ));
        assert!(!profile.is_logged_in_url("https://mp.weixin.qq.com/"));
        assert!(!profile.is_logged_in_url("https://mp.weixin.qq.com/cgi-bin/loginpage"));
    }

    #[test]
    fn editor_url_carries_token_and_type() {
        let profile = mp_profile();
        let url = profile.editor_url("99", PostKind::ImageText);
        assert!(url.starts_with("https://mp.weixin.qq.com/cgi-bin/appmsg?t=media/appmsg_edit_v2"));
        assert!(url.contains("&type=77&token=99"));
        assert!(profile.is_editor_url(&url));
        assert!(profile
            .editor_url("99", PostKind::Article)
            .contains("&type=10&"));
    }
}
