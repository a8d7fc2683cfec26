// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Text dumps of frame compositions and squash caches.

use std::fmt::{self, Write};

use strata_core::composition::{CompositionRegion, FrameComposition};
use strata_core::planner::CompositionPlanEntry;
use strata_core::squash::ChangeHistoryCache;

/// Writes the kind, layers, plan entries, regions and timeline of `comp`.
pub fn write_composition(out: &mut dyn Write, comp: &FrameComposition) -> fmt::Result {
    writeln!(
        out,
        "composition frame={} kind={:?} pipe={} geometry_changed={} fidelity={:?}",
        comp.frame_no(),
        comp.kind(),
        comp.pipe().0,
        comp.geometry_changed(),
        comp.composition_plan().fidelity(),
    )?;
    if let Some(mode) = comp.power_mode() {
        writeln!(out, "  power: {mode:?}")?;
    }
    if let Some(mode) = comp.display_mode() {
        writeln!(
            out,
            "  mode: {}x{} @ {} mHz",
            mode.width, mode.height, mode.refresh_mhz
        )?;
    }

    writeln!(out, "  layers ({}):", comp.layers().len())?;
    for (i, layer) in comp.layers().iter().enumerate() {
        writeln!(
            out,
            "    [{i}] {:?} {:?} {:?} {:?} alpha={} flags={:?} transform={:?} release={:?}",
            layer.buffer,
            layer.display_frame,
            layer.format,
            layer.blending,
            layer.alpha,
            layer.flags,
            layer.transform,
            layer.release_fence(),
        )?;
    }

    let entries = comp.composition_plan().entries();
    writeln!(out, "  entries ({}):", entries.len())?;
    for entry in entries {
        write!(out, "    {:?} ", entry.plane())?;
        match entry {
            CompositionPlanEntry::Disable { .. } => writeln!(out, "DISABLE")?,
            CompositionPlanEntry::DirectLayer {
                layer,
                pre_transform,
                ..
            } => {
                let note = if *pre_transform { " (pre-transformed)" } else { "" };
                writeln!(out, "LAYER {layer}{note}")?;
            }
            CompositionPlanEntry::Packed { layers, .. } => writeln!(out, "PACKED {layers:?}")?,
            CompositionPlanEntry::Precomposition { layers, .. } => {
                writeln!(out, "PRECOMPOSITION {layers:?}")?;
            }
            CompositionPlanEntry::SquashComposite { .. } => {
                let how = if comp.reuses_squash_buffer() { "reused" } else { "fresh" };
                writeln!(out, "SQUASH ({how})")?;
            }
        }
    }

    write_regions(out, "squash regions", comp.squash_regions())?;
    write_regions(out, "precomp regions", comp.pre_comp_regions())?;

    let timeline = comp.timeline();
    writeln!(
        out,
        "  timeline: created={} realized={}",
        timeline.last_created(),
        timeline.realized(),
    )
}

fn write_regions(out: &mut dyn Write, title: &str, regions: &[CompositionRegion]) -> fmt::Result {
    writeln!(out, "  {title} ({}):", regions.len())?;
    for region in regions {
        writeln!(out, "    {:?} layers={:?}", region.frame, region.source_layers)?;
    }
    Ok(())
}

/// Writes the generation, history depth and every region of `cache`.
pub fn write_squash_cache(out: &mut dyn Write, cache: &ChangeHistoryCache) -> fmt::Result {
    writeln!(
        out,
        "squash cache generation={} history={}/{}",
        cache.generation(),
        cache.valid_history(),
        cache.history_length(),
    )?;
    let width = usize::try_from(cache.history_length()).unwrap_or(32);
    for (i, region) in cache.regions().iter().enumerate() {
        let layers: Vec<usize> = region.layers().collect();
        writeln!(
            out,
            "  [{i}] {:?} history={:0width$b} layers={layers:?}{}",
            region.rect,
            region.history(),
            if region.is_squashed() { " squashed" } else { "" },
        )?;
    }
    Ok(())
}

/// [`write_composition`] into a new string.
#[must_use]
pub fn composition(comp: &FrameComposition) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_composition(&mut out, comp);
    out
}

/// [`write_squash_cache`] into a new string.
#[must_use]
pub fn squash_cache(cache: &ChangeHistoryCache) -> String {
    let mut out = String::new();
    let _ = write_squash_cache(&mut out, cache);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::backend::ResourceEnumerator;
    use strata_core::fence::SoftwareTimelineFactory;
    use strata_core::output::PipeId;
    use strata_core::planner::{Planner, PlannerConfig};
    use strata_harness::{FakeImporter, FakeResources, layer_stack};

    #[test]
    fn composition_dump_lists_entries_and_regions() {
        let importer = FakeImporter::new();
        let mut comp =
            FrameComposition::new(PipeId(0), importer, &SoftwareTimelineFactory).unwrap();
        comp.set_frame_no(12);
        comp.set_layers(layer_stack(1, 4), true).unwrap();
        let mut usable = FakeResources::uniform(2).usable_planes(PipeId(0));
        comp.plan(&Planner::new(PlannerConfig::DEFAULT), None, &mut usable)
            .unwrap();

        let text = composition(&comp);
        assert!(text.starts_with("composition frame=12 kind=Frame"), "got: {text}");
        assert!(text.contains("layers (4):"), "got: {text}");
        assert!(text.contains("entries (2):"), "got: {text}");
        assert!(text.contains("PRECOMPOSITION"), "got: {text}");
        assert!(!text.contains("precomp regions (0)"), "got: {text}");
    }

    #[test]
    fn squash_dump_shows_history_bits() {
        let layers = layer_stack(1, 2);
        let mut cache = ChangeHistoryCache::new(4);
        cache.init(&layers);
        let changed = cache.generate_history(&layers);
        cache.record_history(&layers, &changed);

        let text = squash_cache(&cache);
        assert!(text.starts_with("squash cache generation="), "got: {text}");
        assert!(text.contains("/4"), "got: {text}");
        assert!(text.contains("history=0"), "got: {text}");
        assert_eq!(text.lines().count(), 1 + cache.regions().len());
    }
}
