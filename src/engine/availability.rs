use crate::model::{RoomState, Slot};

/// Merge sorted overlapping/adjacent slots into disjoint slots.
pub fn merge_overlapping(sorted: &[Slot]) -> Vec<Slot> {
    let mut merged: Vec<Slot> = Vec::new();
    for &slot in sorted {
        if let Some(last) = merged.last_mut()
            && slot.start <= last.end
        {
            last.end = last.end.max(slot.end);
            continue;
        }
        merged.push(slot);
    }
    merged
}

/// Subtract sorted disjoint `taken` slots from sorted `base` slots.
pub fn subtract_slots(base: &[Slot], taken: &[Slot]) -> Vec<Slot> {
    let mut result = Vec::new();
    let mut ti = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ti < taken.len() && taken[ti].end <= current_start {
            ti += 1;
        }

        let mut j = ti;
        while j < taken.len() && taken[j].start < current_end {
            let t = &taken[j];
            if t.start > current_start {
                result.push(Slot::new(current_start, t.start));
            }
            current_start = current_start.max(t.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Slot::new(current_start, current_end));
        }
    }

    result
}

/// The gaps left in `window` once the room's reservations are taken out.
pub fn free_windows(room: &RoomState, window: &Slot) -> Vec<Slot> {
    let mut taken: Vec<Slot> = room
        .overlapping(window)
        .map(|r| {
            Slot::new(
                r.slot.start.max(window.start),
                r.slot.end.min(window.end),
            )
        })
        .collect();
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);
    subtract_slots(&[*window], &taken)
}
