// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::codec::NetPacket;

/// A soft-bus level observer. Held weakly by [`super::SoftbusAdapter`] so a
/// dropped observer never blocks event delivery; before each dispatch the
/// adapter upgrades the weak reference and skips dead entries.
pub trait SoftbusObserver: Send + Sync {
    fn on_bind(&self, network_id: &str);

    fn on_shutdown(&self, network_id: &str);

    /// Returns `true` when this observer consumed the packet, short-
    /// circuiting the remaining observers in the ordered set.
    fn on_packet(&self, network_id: &str, packet: &NetPacket) -> bool;
}
