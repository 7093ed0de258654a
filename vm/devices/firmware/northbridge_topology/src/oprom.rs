// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Option ROM device id remapping.

/// Integrated graphics devices that share one generic video BIOS image.
const SHARED_VBIOS: core::ops::RangeInclusive<u32> = 0x1002_1300..=0x1002_131f;
/// The id the shared video BIOS header carries.
const GENERIC_VBIOS_ID: u32 = 0x1002_1304;
/// HD audio function inside the graphics id range; keeps its own ROM.
const HD_AUDIO_ID: u32 = 0x1002_1308;

/// Maps a `vendor << 16 | device` id to the id its option ROM is built
/// for.
pub fn map_oprom_vendev(vendev: u32) -> u32 {
    let mapped = if vendev != HD_AUDIO_ID && SHARED_VBIOS.contains(&vendev) {
        GENERIC_VBIOS_ID
    } else {
        vendev
    };
    if mapped != vendev {
        tracing::info!(vendev, mapped, "mapping option rom device id");
    }
    mapped
}
