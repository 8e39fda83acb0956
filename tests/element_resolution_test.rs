mod common;

use common::{dom as node, dom_label, dom_row as row, FakePage};
use mp_publisher::browser::driver::Rect;
use mp_publisher::element::{
    find_by_proximity, find_first_visible, get_bounding_center, ElementDescriptor, Locator,
    ProximityDirection, ProximityQuery, Resolution, ResolveOptions,
};
use mp_publisher::error::PublishError;
use std::time::Duration;

fn options(timeout_ms: u64) -> ResolveOptions {
    ResolveOptions {
        timeout: Duration::from_millis(timeout_ms),
        poll_interval: Duration::from_millis(50),
        ..ResolveOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn later_locator_wins_over_invisible_earlier_matches() {
    let page = FakePage::new(common::HOME_URL);
    let a = Locator::css("#title");
    let b = Locator::attribute("textarea", "placeholder", "标题");
    let c = Locator::attribute("input", "placeholder", "标题");
    page.add_hidden(&a, "");
    page.add_collapsed(&b);
    let visible = page.add(&c, "");

    let descriptor = ElementDescriptor::new("title input")
        .locator(a)
        .locator(b)
        .locator(c.clone());
    let found = find_first_visible(page.as_ref(), &descriptor, &options(500))
        .await
        .unwrap()
        .found()
        .expect("title input resolves");
    assert_eq!(found.ref_id, visible);
    assert_eq!(found.locator, c.to_string());
}

#[tokio::test(start_paused = true)]
async fn not_found_reports_every_locator_tried() {
    let page = FakePage::new(common::HOME_URL);
    let descriptor = ElementDescriptor::new("save draft")
        .css("#js_submit button")
        .text("button", "保存为草稿");
    page.add_hidden(&descriptor.locators[0], "");

    let resolution = find_first_visible(page.as_ref(), &descriptor, &options(300))
        .await
        .unwrap();
    let Resolution::NotFound(miss) = resolution else {
        panic!("expected a miss");
    };
    assert_eq!(miss.target, "save draft");
    assert!(miss.waited >= Duration::from_millis(300));
    assert_eq!(
        miss.trace(),
        vec![
            "css(#js_submit button) matched=1 visible=0".to_string(),
            "text(button = \"保存为草稿\") matched=0 visible=0".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn hidden_matches_are_accepted_when_visibility_is_not_required() {
    let page = FakePage::new(common::HOME_URL);
    let input = Locator::css("input[type=\"file\"]");
    let hidden = page.add_hidden(&input, "");
    let descriptor = ElementDescriptor::new("file input").locator(input);

    let strict = find_first_visible(page.as_ref(), &descriptor, &options(100))
        .await
        .unwrap();
    assert!(!strict.is_found());

    let relaxed = find_first_visible(page.as_ref(), &descriptor, &options(100).allow_hidden())
        .await
        .unwrap()
        .found()
        .unwrap();
    assert_eq!(relaxed.ref_id, hidden);
}

#[tokio::test(start_paused = true)]
async fn polls_until_the_element_renders() {
    let page = FakePage::new(common::HOME_URL);
    let locator = Locator::css("#title");
    let descriptor = ElementDescriptor::new("title input").locator(locator.clone());

    let late = page.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        late.add(&locator, "");
    });

    let found = find_first_visible(page.as_ref(), &descriptor, &options(1_000))
        .await
        .unwrap();
    assert!(found.is_found());
}

#[tokio::test(start_paused = true)]
async fn closed_page_is_an_error_not_a_miss() {
    let page = FakePage::new(common::HOME_URL);
    page.close();
    let descriptor = ElementDescriptor::new("title input").css("#title");
    let result = find_first_visible(page.as_ref(), &descriptor, &options(100)).await;
    assert!(matches!(result, Err(PublishError::ConnectionClosed)));
}

#[tokio::test(start_paused = true)]
async fn proximity_finds_the_value_next_to_the_label() {
    let page = FakePage::new(common::HOME_URL);
    let label = dom_label(2, "原创");
    page.add_proximity("原创", row(1, vec![label, node(3, "未声明")]));

    let query = ProximityQuery::new("原创", &["未声明", "未开启"]);
    let found = find_by_proximity(page.as_ref(), &query, &options(200))
        .await
        .unwrap()
        .found()
        .unwrap();
    assert_eq!(found.ref_id, 3);
    assert_eq!(found.text, "未声明");
}

#[tokio::test(start_paused = true)]
async fn proximity_never_returns_a_node_carrying_the_label() {
    let page = FakePage::new(common::HOME_URL);
    let label = dom_label(2, "合集");
    // A sibling repeating the label text must not be mistaken for the value.
    let echo = row(3, vec![node(4, "合集"), node(5, "未添加")]);
    page.add_proximity("合集", row(1, vec![label, echo]));

    let query = ProximityQuery::new("合集", &["合集", "未添加"]);
    let found = find_by_proximity(page.as_ref(), &query, &options(200))
        .await
        .unwrap()
        .found()
        .unwrap();
    assert_eq!(found.ref_id, 5);
}

#[tokio::test(start_paused = true)]
async fn proximity_respects_the_sibling_window() {
    let page = FakePage::new(common::HOME_URL);
    let mut children = vec![dom_label(2, "赞赏")];
    for i in 0..5 {
        children.push(node(10 + i, "说明"));
    }
    children.push(node(20, "不开启"));
    page.add_proximity("赞赏", row(1, children));

    let query = ProximityQuery::new("赞赏", &["不开启"])
        .direction(ProximityDirection::FollowingSibling);
    let miss = find_by_proximity(page.as_ref(), &query, &options(100))
        .await
        .unwrap();
    let Resolution::NotFound(miss) = miss else {
        panic!("value beyond the window must not resolve");
    };
    assert_eq!(miss.attempts.len(), 1);
    assert_eq!(miss.attempts[0].matched, 1);

    let wider = query.max_siblings(6);
    assert!(find_by_proximity(page.as_ref(), &wider, &options(100))
        .await
        .unwrap()
        .is_found());
}

#[tokio::test(start_paused = true)]
async fn bounding_center_is_none_once_detached() {
    let page = FakePage::new(common::HOME_URL);
    let locator = Locator::css("#author");
    let id = page.add(&locator, "");
    let descriptor = ElementDescriptor::new("author input").locator(locator);
    let element = find_first_visible(page.as_ref(), &descriptor, &options(100))
        .await
        .unwrap()
        .found()
        .unwrap();

    let center = get_bounding_center(page.as_ref(), &element).await.unwrap();
    assert_eq!(center, Some(Rect::new(10.0, 40.0 * id as f64, 100.0, 30.0).center()));

    page.detach(id);
    assert_eq!(get_bounding_center(page.as_ref(), &element).await.unwrap(), None);
}
