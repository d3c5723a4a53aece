//! Fixed vector layouts, one per narrative shape.

use askama::Template;

use crate::{
    domain::blueprint::{Blueprint, NarrativeShape},
    infra::engine::Viewport,
};

use super::palette::{Palette, Rgb};

const HEADER_HEIGHT: i32 = 180;
const MARGIN: i32 = 60;
/// Delay between consecutive slot entrances when animated.
pub(super) const STAGGER_MS: u64 = 400;
/// Duration of one slot entrance.
pub(super) const ENTRANCE_MS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Slot {
    pub cx: i32,
    pub cy: i32,
    pub radius: i32,
    pub label_x: i32,
    pub label_y: i32,
    pub anchor: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Connector {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Hub {
    pub cx: i32,
    pub cy: i32,
    pub radius: i32,
    pub text: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Layout {
    pub slots: Vec<Slot>,
    pub connectors: Vec<Connector>,
    pub hub: Option<Hub>,
}

/// Place `count` items on the canvas for `shape`.
pub(super) fn layout(shape: NarrativeShape, count: usize, viewport: Viewport) -> Layout {
    let width = viewport.width as i32;
    let height = viewport.height as i32;
    let count = count.max(1);
    let n = count as i32;
    let left = MARGIN;
    let span = width - 2 * MARGIN;
    let top = HEADER_HEIGHT;
    let middle = top + (height - top - MARGIN) / 2;
    let column = span / n;

    let mut hub = None;
    let slots: Vec<Slot> = match shape {
        NarrativeShape::Process => {
            let radius = (column * 35 / 100).min(110);
            (0..n)
                .map(|i| below(left + column * i + column / 2, middle, radius))
                .collect()
        }
        NarrativeShape::Journey => {
            let radius = (column * 35 / 100).min(100);
            (0..n)
                .map(|i| {
                    let lift = if i % 2 == 0 { -120 } else { 120 };
                    below(left + column * i + column / 2, middle + lift, radius)
                })
                .collect()
        }
        NarrativeShape::Timeline => {
            let radius = (column * 38 / 100).min(80);
            (0..n)
                .map(|i| {
                    let cx = left + column * i + column / 2;
                    let label_y = if i % 2 == 0 {
                        middle - radius - 24
                    } else {
                        middle + radius + 44
                    };
                    Slot {
                        cx,
                        cy: middle,
                        radius,
                        label_x: cx,
                        label_y,
                        anchor: "middle",
                    }
                })
                .collect()
        }
        NarrativeShape::Stack => {
            let row = (height - top - MARGIN) / n;
            let radius = (row * 36 / 100).min(90);
            let cx = left + 140;
            (0..n)
                .map(|i| {
                    let cy = top + row * i + row / 2;
                    Slot {
                        cx,
                        cy,
                        radius,
                        label_x: cx + radius + 36,
                        label_y: cy + 10,
                        anchor: "start",
                    }
                })
                .collect()
        }
        NarrativeShape::Hub => {
            let center = Hub {
                cx: width / 2,
                cy: middle,
                radius: 90,
                text: "",
            };
            let ring = (width.min(height - top) * 34 / 100).max(center.radius + 120);
            let radius = 70;
            hub = Some(center);
            (0..count)
                .map(|i| {
                    let angle = -std::f64::consts::FRAC_PI_2
                        + std::f64::consts::TAU * i as f64 / count as f64;
                    let cx = center.cx + (f64::from(ring) * angle.cos()).round() as i32;
                    let cy = center.cy + (f64::from(ring) * angle.sin()).round() as i32;
                    below(cx, cy, radius)
                })
                .collect()
        }
        NarrativeShape::Comparison => {
            let radius = (column * 36 / 100).min(170);
            hub = Some(Hub {
                cx: width / 2,
                cy: middle,
                radius: 44,
                text: "VS",
            });
            (0..n)
                .map(|i| below(left + column * i + column / 2, middle, radius))
                .collect()
        }
    };

    let connectors = match shape {
        NarrativeShape::Timeline => match (slots.first(), slots.last()) {
            (Some(first), Some(last)) => vec![Connector {
                x1: first.cx - first.radius,
                y1: first.cy,
                x2: last.cx + last.radius,
                y2: last.cy,
            }],
            _ => Vec::new(),
        },
        NarrativeShape::Hub => slots
            .iter()
            .map(|slot| Connector {
                x1: width / 2,
                y1: middle,
                x2: slot.cx,
                y2: slot.cy,
            })
            .collect(),
        NarrativeShape::Comparison => Vec::new(),
        NarrativeShape::Process | NarrativeShape::Journey | NarrativeShape::Stack => slots
            .windows(2)
            .map(|pair| Connector {
                x1: pair[0].cx,
                y1: pair[0].cy,
                x2: pair[1].cx,
                y2: pair[1].cy,
            })
            .collect(),
    };

    Layout {
        slots,
        connectors,
        hub,
    }
}

fn below(cx: i32, cy: i32, radius: i32) -> Slot {
    Slot {
        cx,
        cy,
        radius,
        label_x: cx,
        label_y: cy + radius + 40,
        anchor: "middle",
    }
}

/// One composed slot as the vector template sees it.
pub(super) struct SlotView<'a> {
    pub number: usize,
    pub slot: Slot,
    pub label: &'a str,
    pub image: Option<&'a str>,
    pub initial: String,
    pub badge_x: i32,
    pub badge_y: i32,
    pub delay_ms: u64,
}

#[derive(Template)]
#[template(path = "infographic.svg", escape = "html")]
struct InfographicSvg<'a> {
    width: u32,
    height: u32,
    palette: &'a Palette,
    badge_text: Rgb,
    title: &'a str,
    background_image: Option<&'a str>,
    hub: Option<Hub>,
    connectors: &'a [Connector],
    slots: &'a [SlotView<'a>],
    dashed: bool,
}

#[derive(Template)]
#[template(path = "infographic.html")]
struct InfographicPage {
    width: u32,
    height: u32,
    background: Rgb,
    svg: String,
    animated: bool,
    entrance_ms: u64,
}

/// Generated images for one infographic, positionally matching the blueprint items.
pub(super) struct ComposedImages {
    pub background: Option<String>,
    pub items: Vec<Option<String>>,
}

/// Compose the full page for `blueprint`. Items must already fit the template.
pub(super) fn compose(
    blueprint: &Blueprint,
    palette: &Palette,
    images: &ComposedImages,
    viewport: Viewport,
    animated: bool,
) -> Result<String, askama::Error> {
    let layout = layout(blueprint.narrative, blueprint.items.len(), viewport);
    let slots: Vec<SlotView<'_>> = blueprint
        .items
        .iter()
        .zip(layout.slots.iter().copied())
        .enumerate()
        .map(|(index, (item, slot))| {
            let offset = slot.radius * 7 / 10;
            SlotView {
                number: index + 1,
                slot,
                label: &item.label,
                image: images.items.get(index).and_then(Option::as_deref),
                initial: item
                    .label
                    .chars()
                    .next()
                    .map(|ch| ch.to_uppercase().collect())
                    .unwrap_or_default(),
                badge_x: slot.cx + offset,
                badge_y: slot.cy - offset,
                delay_ms: index as u64 * STAGGER_MS,
            }
        })
        .collect();

    let svg = InfographicSvg {
        width: viewport.width,
        height: viewport.height,
        palette,
        badge_text: palette.badge_text(),
        title: &blueprint.title,
        background_image: images.background.as_deref(),
        hub: layout.hub,
        connectors: &layout.connectors,
        slots: &slots,
        dashed: blueprint.narrative == NarrativeShape::Journey,
    }
    .render()?;

    InfographicPage {
        width: viewport.width,
        height: viewport.height,
        background: palette.background,
        svg,
        animated,
        entrance_ms: ENTRANCE_MS,
    }
    .render()
}
