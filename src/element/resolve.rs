use crate::browser::driver::{PageDriver, Point};
use crate::element::descriptor::{
    ElementDescriptor, LocatorAttempt, NotFound, Resolution, ResolveOptions, ResolvedElement,
};
use crate::element::proximity::{locate_value, ProximityQuery};
use crate::error::{PublishError, Result};
use log::debug;
use tokio::time::Instant;

fn ensure_open(page: &dyn PageDriver) -> Result<()> {
    if page.is_open() {
        Ok(())
    } else {
        Err(PublishError::ConnectionClosed)
    }
}

/// Try each locator in order and return the first visible match.
///
/// Invisible matches never short-circuit the list: a later locator with a
/// visible match still wins. Polls until `options.timeout`; absence is a
/// `Resolution::NotFound`, not an error.
pub async fn find_first_visible(
    page: &dyn PageDriver,
    descriptor: &ElementDescriptor,
    options: &ResolveOptions,
) -> Result<Resolution> {
    ensure_open(page)?;
    let start = Instant::now();
    loop {
        let mut attempts = Vec::with_capacity(descriptor.locators.len());
        for locator in &descriptor.locators {
            let candidates = page.query_candidates(locator, options.max_matches).await?;
            let visible = candidates.iter().filter(|c| c.is_visible()).count();
            attempts.push(LocatorAttempt {
                locator: locator.to_string(),
                matched: candidates.len(),
                visible,
            });

            let chosen = candidates
                .into_iter()
                .find(|c| !options.require_visible || c.is_visible());
            if let Some(candidate) = chosen {
                debug!(
                    "[Resolve] {} -> {} ref={} after {}ms",
                    descriptor.name,
                    locator,
                    candidate.ref_id,
                    start.elapsed().as_millis()
                );
                return Ok(Resolution::Found(ResolvedElement {
                    target: descriptor.name.clone(),
                    ref_id: candidate.ref_id,
                    locator: locator.to_string(),
                    tag: candidate.tag,
                    text: candidate.text,
                    rect: candidate.rect,
                }));
            }
        }

        if start.elapsed() >= options.timeout {
            return Ok(Resolution::NotFound(NotFound {
                target: descriptor.name.clone(),
                attempts,
                waited: start.elapsed(),
            }));
        }
        tokio::time::sleep(options.poll_interval).await;
    }
}

/// Locate a value element relative to a label, e.g. "未声明" next to "原创".
pub async fn find_by_proximity(
    page: &dyn PageDriver,
    query: &ProximityQuery,
    options: &ResolveOptions,
) -> Result<Resolution> {
    ensure_open(page)?;
    let start = Instant::now();
    loop {
        let roots = page
            .proximity_snapshot(&query.anchor_text, query.climb_limit())
            .await?;
        let hit = roots.iter().find_map(|root| locate_value(root, query));
        if let Some(node) = hit {
            debug!(
                "[Resolve] {} -> ref={} text={:?}",
                query.describe(),
                node.ref_id,
                node.text
            );
            return Ok(Resolution::Found(ResolvedElement {
                target: query.anchor_text.clone(),
                ref_id: node.ref_id,
                locator: query.describe(),
                tag: node.tag.clone(),
                text: node.text.clone(),
                rect: node.rect,
            }));
        }

        if start.elapsed() >= options.timeout {
            return Ok(Resolution::NotFound(NotFound {
                target: query.anchor_text.clone(),
                attempts: vec![LocatorAttempt {
                    locator: query.describe(),
                    matched: roots.len(),
                    visible: 0,
                }],
                waited: start.elapsed(),
            }));
        }
        tokio::time::sleep(options.poll_interval).await;
    }
}

/// Click coordinates for `element`, scrolling it into view first.
///
/// `None` when the element left the DOM or collapsed to zero size.
pub async fn get_bounding_center(
    page: &dyn PageDriver,
    element: &ResolvedElement,
) -> Result<Option<Point>> {
    ensure_open(page)?;
    let rect = page.scroll_into_view(&element.selector()).await?;
    Ok(rect.filter(|r| r.has_area()).map(|r| r.center()))
}
