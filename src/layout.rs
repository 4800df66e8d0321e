//! Card placement for one clock surface.
//!
//! Cards are square and separated by gaps of one eighth of a card
//! ("1 unit gap : 8 unit card"). Only the gaps between cards are reserved;
//! whatever is left over on the long axis becomes equal outer margins.

use crate::surface::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub hour: Rect,
    pub minute: Rect,
    pub second: Option<Rect>,
    pub space: i32,
}

pub fn compute_layout(surface_w: i32, surface_h: i32, show_second: bool, card_scale: f32) -> Layout {
    let (w, h) = (surface_w.max(0), surface_h.max(0));
    let cards_length = if show_second { 3 } else { 2 };
    let spaces_length = cards_length + 1;
    let units = cards_length * 8 + spaces_length;
    let landscape = w >= h;

    // Long axis decides the gap; the card is capped by 80% of the short axis.
    let (long, short) = if landscape { (w, h) } else { (h, w) };
    let space = long / units;
    let by_short = (short as f64 * 0.8) as i32;
    let by_long = long * 8 / units;
    let card = (by_short.min(by_long) as f64 * card_scale as f64) as i32;

    let start = (long - card * cards_length - space * (spaces_length - 2)) / 2;
    let cross = (short - card) / 2;
    let place = |i: i32| {
        let along = start + i * (card + space);
        if landscape {
            Rect::new(along, cross, card, card)
        } else {
            Rect::new(cross, along, card, card)
        }
    };

    Layout {
        hour: place(0),
        minute: place(1),
        second: show_second.then(|| place(2)),
        space,
    }
}

/// Card-local rectangle of the AM/PM label: bottom-left, a tenth of the
/// card tall, as wide as one label height per character.
pub fn sub_label_rect(card: Rect, label_len: usize) -> Rect {
    let h = card.h / 10;
    Rect::new(card.h / 50, card.h - card.h / 35 - h, h * label_len as i32, h)
}

/// Index of the display containing `point`, or the last display when the
/// point is outside all of them. `None` only when there are no displays.
pub fn display_containing(displays: &[Rect], point: (i32, i32)) -> Option<usize> {
    displays
        .iter()
        .position(|d| d.contains(point.0, point.1))
        .or_else(|| displays.len().checked_sub(1))
}
