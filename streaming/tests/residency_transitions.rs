//! Residency transitions of single textures: page-out strategies, cubemaps,
//! manual textures, batching, destruction and the metadata cache.

mod common;

use common::{RecordingListener, Scene, create_2d, pattern_image, pump, test_config};
use texstream::{
    CachedMetadata, MetadataCache, PageOutStrategy, PixelFormat, Residency, ResidencyReason,
    StreamingError, TextureFilters, TextureFlags, TextureKind, TextureMetadata, TextureOrigin,
    TransitionTask,
};

use ResidencyReason::*;

// ============================================================================
// Texture objects
// ============================================================================

#[test]
fn test_texture_names() {
    let scene = Scene::new();
    let mut manager = scene.manager(test_config());

    let texture = create_2d(&mut manager, "brick.tex");
    assert_eq!(manager.texture(texture).unwrap().alias(), "brick.tex");
    assert_eq!(manager.find_texture("brick.tex"), Some(texture));
    assert!(matches!(
        manager.create_texture(
            "brick.tex",
            "",
            PageOutStrategy::Discard,
            TextureFlags::empty(),
            TextureKind::Type2D,
            ""
        ),
        Err(StreamingError::DuplicateName(_))
    ));
    assert!(matches!(
        manager.create_texture(
            "",
            "",
            PageOutStrategy::Discard,
            TextureFlags::empty(),
            TextureKind::Type2D,
            ""
        ),
        Err(StreamingError::InvalidParameter(_))
    ));

    let again = manager
        .create_or_retrieve_texture(
            "brick.tex",
            "other",
            PageOutStrategy::Discard,
            TextureFlags::empty(),
            TextureKind::Type2D,
            "",
        )
        .unwrap();
    assert_eq!(again, texture);
    assert_eq!(manager.texture_count(), 1);
}

// ============================================================================
// Page-out strategies
// ============================================================================

#[test]
fn test_save_to_system_ram_round_trip() {
    let scene = Scene::new();
    let image = pattern_image(96, 64, 1, TextureKind::Type2D, 3, 21);
    scene.add("round.tex", &image);
    let mut manager = scene.manager(test_config());
    let listener = RecordingListener::new();

    let texture = create_2d(&mut manager, "round.tex");
    manager.add_listener(texture, listener.weak()).unwrap();
    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    pump(&mut manager, &scene.backend);
    assert!(manager.texture(texture).unwrap().host_copy().is_none());

    // paging out and back in twice leaves the GPU content untouched
    for pass in 0..2 {
        manager
            .schedule_transition(texture, Residency::OnSystemRam)
            .unwrap();
        pump(&mut manager, &scene.backend);

        let obj = manager.texture(texture).unwrap();
        assert_eq!(obj.residency(), Residency::OnSystemRam);
        assert!(!obj.has_gpu_storage());
        assert_eq!(obj.host_copy().unwrap().data(), image.data(), "pass {pass}");
        assert_eq!(scene.backend.stats().live_textures, 0);

        manager
            .schedule_transition(texture, Residency::Resident)
            .unwrap();
        pump(&mut manager, &scene.backend);

        let obj = manager.texture(texture).unwrap();
        assert_eq!(obj.residency(), Residency::Resident);
        assert!(obj.host_copy().is_none());
        for mip in 0..3 {
            assert_eq!(
                manager.read_texture_contents(texture, mip).unwrap(),
                image.mip_bytes(mip),
                "pass {pass} mip {mip}"
            );
        }
    }
    assert_eq!(
        listener.reasons(texture),
        vec![
            GainedResidency,
            ReadyForRendering,
            LostResidency,
            GainedResidency,
            ReadyForRendering,
            LostResidency,
            GainedResidency,
            ReadyForRendering
        ]
    );
}

#[test]
fn test_always_keep_system_ram_copy_pages_out_without_readback() {
    let scene = Scene::new();
    let image = pattern_image(64, 64, 1, TextureKind::Type2D, 1, 2);
    scene.add("kept.tex", &image);
    let mut manager = scene.manager(test_config());

    let texture = manager
        .create_texture(
            "kept.tex",
            "",
            PageOutStrategy::AlwaysKeepSystemRamCopy,
            TextureFlags::empty(),
            TextureKind::Type2D,
            "",
        )
        .unwrap();
    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    pump(&mut manager, &scene.backend);
    assert!(manager.texture(texture).unwrap().host_copy().is_some());

    manager
        .schedule_transition(texture, Residency::OnSystemRam)
        .unwrap();
    // no GPU round trip needed
    let obj = manager.texture(texture).unwrap();
    assert_eq!(obj.residency(), Residency::OnSystemRam);
    assert!(!obj.has_pending_work());
    assert_eq!(obj.host_copy().unwrap().data(), image.data());
    assert_eq!(scene.backend.stats().live_textures, 0);
}

#[test]
fn test_discard_reloads_from_storage() {
    let scene = Scene::new();
    let image = pattern_image(64, 32, 1, TextureKind::Type2D, 1, 9);
    scene.add("discard.tex", &image);
    let mut manager = scene.manager(test_config());

    let texture = manager
        .create_texture(
            "discard.tex",
            "",
            PageOutStrategy::Discard,
            TextureFlags::empty(),
            TextureKind::Type2D,
            "",
        )
        .unwrap();
    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    pump(&mut manager, &scene.backend);
    manager
        .schedule_transition(texture, Residency::OnSystemRam)
        .unwrap();
    pump(&mut manager, &scene.backend);

    let obj = manager.texture(texture).unwrap();
    assert_eq!(obj.residency(), Residency::OnSystemRam);
    assert_eq!(obj.host_copy().unwrap().data(), image.data());
    assert_eq!(manager.stats().loads_scheduled, 2);
}

#[test]
fn test_transition_to_storage_frees_everything() {
    let scene = Scene::new();
    scene.add("free.tex", &pattern_image(32, 32, 1, TextureKind::Type2D, 1, 1));
    let mut manager = scene.manager(test_config());
    let listener = RecordingListener::new();

    let texture = create_2d(&mut manager, "free.tex");
    manager.add_listener(texture, listener.weak()).unwrap();
    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    pump(&mut manager, &scene.backend);
    assert_eq!(scene.backend.stats().live_textures, 1);

    manager
        .schedule_transition(texture, Residency::OnStorage)
        .unwrap();
    let obj = manager.texture(texture).unwrap();
    assert_eq!(obj.residency(), Residency::OnStorage);
    assert!(!obj.is_data_ready());
    assert_eq!(scene.backend.stats().live_textures, 0);
    assert_eq!(listener.reasons(texture).last(), Some(&LostResidency));
}

#[test]
fn test_queued_transitions_run_one_at_a_time() {
    let scene = Scene::new();
    let image = pattern_image(256, 256, 1, TextureKind::Type2D, 1, 4);
    scene.add("queued.tex", &image);
    let mut manager = scene.manager(test_config().with_max_split_resolution(64));

    let texture = create_2d(&mut manager, "queued.tex");
    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    manager
        .schedule_transition(texture, Residency::OnSystemRam)
        .unwrap();
    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    assert!(manager.texture(texture).unwrap().has_pending_work());
    pump(&mut manager, &scene.backend);

    let obj = manager.texture(texture).unwrap();
    assert_eq!(obj.residency(), Residency::Resident);
    assert!(obj.is_data_ready());
    assert_eq!(manager.stats().peak_transitions_per_texture, 1);
    assert_eq!(
        manager.read_texture_contents(texture, 0).unwrap(),
        image.mip_bytes(0)
    );
}

// ============================================================================
// Sources
// ============================================================================

#[test]
fn test_cubemap_from_six_files() {
    let scene = Scene::new();
    let faces: Vec<_> = (0..6)
        .map(|i| pattern_image(16, 16, 1, TextureKind::Type2D, 1, 40 * i as u8))
        .collect();
    for (suffix, face) in texstream::CUBEMAP_FACE_SUFFIXES.iter().zip(&faces) {
        scene.add(&format!("sky{suffix}.tex"), face);
    }
    let mut manager = scene.manager(test_config());

    let texture = manager
        .create_texture(
            "sky.tex",
            "",
            PageOutStrategy::SaveToSystemRam,
            TextureFlags::empty(),
            TextureKind::TypeCube,
            "",
        )
        .unwrap();
    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    pump(&mut manager, &scene.backend);

    let obj = manager.texture(texture).unwrap();
    assert_eq!(obj.kind(), TextureKind::TypeCube);
    assert_eq!(obj.depth_or_slices(), 6);
    let expected: Vec<u8> = faces.iter().flat_map(|f| f.mip_bytes(0).to_vec()).collect();
    assert_eq!(manager.read_texture_contents(texture, 0).unwrap(), expected);
}

#[test]
fn test_cubemap_with_missing_face_falls_back_to_cube() {
    let scene = Scene::new();
    scene.add("half_rt.tex", &pattern_image(16, 16, 1, TextureKind::Type2D, 1, 0));
    let mut manager = scene.manager(test_config());
    let listener = RecordingListener::new();

    let texture = manager
        .create_texture(
            "half.tex",
            "",
            PageOutStrategy::SaveToSystemRam,
            TextureFlags::empty(),
            TextureKind::TypeCube,
            "",
        )
        .unwrap();
    manager.add_listener(texture, listener.weak()).unwrap();
    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    pump(&mut manager, &scene.backend);

    assert_eq!(listener.errors().len(), 1);
    let obj = manager.texture(texture).unwrap();
    assert_eq!(obj.kind(), TextureKind::TypeCube);
    assert_eq!(obj.depth_or_slices(), 6);
    assert!(obj.is_data_ready());
}

#[test]
fn test_caller_image_kept_as_host_copy() {
    let scene = Scene::new();
    let mut manager = scene.manager(test_config());
    let image = pattern_image(40, 24, 1, TextureKind::Type2D, 2, 77);

    let texture = create_2d(&mut manager, "generated");
    manager
        .schedule_transition_to(
            texture,
            TransitionTask::new(Residency::Resident).with_image(image.clone(), false),
        )
        .unwrap();
    pump(&mut manager, &scene.backend);

    let obj = manager.texture(texture).unwrap();
    assert!(obj.is_data_ready());
    assert_eq!(obj.host_copy().unwrap().data(), image.data());
    assert_eq!(
        manager.read_texture_contents(texture, 1).unwrap(),
        image.mip_bytes(1)
    );
    assert!(manager.metadata_cache().get("generated").is_none());
}

#[test]
fn test_schedule_load_replaces_source() {
    let scene = Scene::new();
    let first = pattern_image(32, 32, 1, TextureKind::Type2D, 1, 1);
    let second = pattern_image(48, 16, 1, TextureKind::Type2D, 1, 2);
    scene.add("first.tex", &first);
    scene.add("second.tex", &second);
    let mut manager = scene.manager(test_config());

    let texture = create_2d(&mut manager, "slot");
    manager
        .schedule_load(texture, "first.tex", "", TextureFilters::empty())
        .unwrap();
    pump(&mut manager, &scene.backend);
    assert_eq!(manager.texture(texture).unwrap().source_name(), "first.tex");

    manager
        .schedule_load(texture, "second.tex", "", TextureFilters::empty())
        .unwrap();
    pump(&mut manager, &scene.backend);

    let obj = manager.texture(texture).unwrap();
    assert_eq!(obj.source_name(), "second.tex");
    assert_eq!((obj.width(), obj.height()), (48, 16));
    assert_eq!(
        manager.read_texture_contents(texture, 0).unwrap(),
        second.mip_bytes(0)
    );
}

// ============================================================================
// Manual textures
// ============================================================================

#[test]
fn test_manual_texture_filled_through_staging() {
    let scene = Scene::new();
    let mut manager = scene.manager(test_config());
    let listener = RecordingListener::new();

    let texture = manager
        .create_texture(
            "canvas",
            "",
            PageOutStrategy::SaveToSystemRam,
            TextureFlags::MANUAL,
            TextureKind::Type2D,
            "",
        )
        .unwrap();
    manager.add_listener(texture, listener.weak()).unwrap();
    assert!(matches!(
        manager.schedule_transition(texture, Residency::Resident),
        Err(StreamingError::MissingMetadata(_))
    ));
    assert!(matches!(
        manager.schedule_transition(texture, Residency::OnSystemRam),
        Err(StreamingError::InvalidParameter(_))
    ));

    manager
        .set_texture_metadata(
            texture,
            TextureMetadata::new(TextureKind::Type2D, 32, 32, 1, PixelFormat::Rgba8Unorm, 1),
        )
        .unwrap();
    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    assert!(manager.texture(texture).unwrap().is_data_ready());
    assert_eq!(listener.reasons(texture), vec![GainedResidency, ReadyForRendering]);

    let image = pattern_image(32, 32, 1, TextureKind::Type2D, 1, 99);
    let mut buffer = manager
        .get_staging_buffer(32, 32, 1, 1, PixelFormat::Rgba8Unorm, 0)
        .unwrap();
    let region = buffer
        .map_region(32, 32, 1, 1, PixelFormat::Rgba8Unorm)
        .unwrap();
    buffer
        .write_region(&region, image.data(), &image.mip_box(0))
        .unwrap();
    manager
        .upload_from_staging(&mut buffer, &region, texture, 0, TextureOrigin::zero())
        .unwrap();
    manager.release_staging_buffer(buffer);

    assert_eq!(
        manager.read_texture_contents(texture, 0).unwrap(),
        image.mip_bytes(0)
    );

    // leaving the GPU reads the manual content back
    manager
        .schedule_transition(texture, Residency::OnSystemRam)
        .unwrap();
    pump(&mut manager, &scene.backend);
    let obj = manager.texture(texture).unwrap();
    assert_eq!(obj.residency(), Residency::OnSystemRam);
    assert_eq!(obj.host_copy().unwrap().data(), image.data());
}

#[test]
fn test_queued_transition_that_cannot_start_reports_error() {
    let scene = Scene::new();
    let mut manager = scene.manager(test_config());
    let listener = RecordingListener::new();

    let texture = manager
        .create_texture(
            "scratch",
            "",
            PageOutStrategy::SaveToSystemRam,
            TextureFlags::MANUAL,
            TextureKind::Type2D,
            "",
        )
        .unwrap();
    manager.add_listener(texture, listener.weak()).unwrap();
    let image = pattern_image(16, 16, 1, TextureKind::Type2D, 1, 4);
    manager
        .schedule_transition_to(
            texture,
            TransitionTask::new(Residency::Resident).with_image(image, true),
        )
        .unwrap();
    // both queue behind the upload; once the image is dropped there is
    // nothing left to bring into system RAM
    manager
        .schedule_transition(texture, Residency::OnStorage)
        .unwrap();
    manager
        .schedule_transition(texture, Residency::OnSystemRam)
        .unwrap();
    pump(&mut manager, &scene.backend);

    assert_eq!(listener.errors(), vec![(texture, "scratch".to_string())]);
    assert_eq!(manager.stats().load_failures, 1);
    let obj = manager.texture(texture).unwrap();
    assert_eq!(obj.residency(), Residency::OnStorage);
    assert!(!obj.has_pending_work());
}

// ============================================================================
// Automatic batching
// ============================================================================

#[test]
fn test_automatic_batching_shares_one_array() {
    let scene = Scene::new();
    let images: Vec<_> = (0..3)
        .map(|i| pattern_image(64, 64, 1, TextureKind::Type2D, 1, 10 + i))
        .collect();
    for (i, image) in images.iter().enumerate() {
        scene.add(&format!("batched_{i}.tex"), image);
    }
    let mut manager = scene.manager(test_config());

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let texture = manager
                .create_texture(
                    &format!("batched_{i}.tex"),
                    "",
                    PageOutStrategy::SaveToSystemRam,
                    TextureFlags::AUTOMATIC_BATCHING,
                    TextureKind::Type2D,
                    "",
                )
                .unwrap();
            manager
                .schedule_transition(texture, Residency::Resident)
                .unwrap();
            texture
        })
        .collect();
    pump(&mut manager, &scene.backend);

    assert_eq!(manager.stats().texture_pools, 1);
    assert_eq!(scene.backend.stats().live_textures, 1);
    let mut slices: Vec<_> = handles
        .iter()
        .map(|h| manager.texture(*h).unwrap().pool_slice().unwrap())
        .collect();
    slices.sort_unstable();
    assert_eq!(slices, vec![0, 1, 2]);
    for (texture, image) in handles.iter().zip(&images) {
        assert_eq!(
            manager.read_texture_contents(*texture, 0).unwrap(),
            image.mip_bytes(0)
        );
    }

    for texture in handles {
        manager.destroy_texture(texture).unwrap();
    }
    assert_eq!(manager.stats().texture_pools, 0);
    assert_eq!(scene.backend.stats().live_textures, 0);
}

// ============================================================================
// Destruction and listeners
// ============================================================================

#[test]
fn test_destroy_while_streaming() {
    let scene = Scene::new();
    scene.add("doomed.tex", &pattern_image(512, 512, 1, TextureKind::Type2D, 1, 0));
    scene.add("survivor.tex", &pattern_image(64, 64, 1, TextureKind::Type2D, 1, 1));
    let mut manager = scene.manager(test_config().with_max_split_resolution(64));
    let listener = RecordingListener::new();

    let doomed = create_2d(&mut manager, "doomed.tex");
    let survivor = create_2d(&mut manager, "survivor.tex");
    manager.add_listener(doomed, listener.weak()).unwrap();
    for texture in [doomed, survivor] {
        manager
            .schedule_transition(texture, Residency::Resident)
            .unwrap();
    }
    manager.update(true);
    manager.destroy_texture(doomed).unwrap();
    pump(&mut manager, &scene.backend);

    assert!(manager.texture(doomed).is_none());
    assert!(manager.find_texture("doomed.tex").is_none());
    assert_eq!(listener.reasons(doomed).last(), Some(&Deleted));
    assert!(matches!(
        manager.schedule_transition(doomed, Residency::Resident),
        Err(StreamingError::InvalidHandle(_))
    ));
    assert!(manager.texture(survivor).unwrap().is_data_ready());
    assert_eq!(scene.backend.stats().live_textures, 1);
}

#[test]
fn test_scheduled_destroy_waits_for_load() {
    let scene = Scene::new();
    scene.add("later.tex", &pattern_image(128, 128, 1, TextureKind::Type2D, 1, 3));
    let mut manager = scene.manager(test_config());
    let listener = RecordingListener::new();

    let texture = create_2d(&mut manager, "later.tex");
    manager.add_listener(texture, listener.weak()).unwrap();
    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    manager.schedule_destroy(texture).unwrap();
    assert!(manager.texture(texture).is_some());
    pump(&mut manager, &scene.backend);

    assert!(manager.texture(texture).is_none());
    assert_eq!(
        listener.reasons(texture),
        vec![GainedResidency, ReadyForRendering, Deleted]
    );
}

#[test]
fn test_removed_listener_hears_nothing() {
    let scene = Scene::new();
    scene.add("quiet.tex", &pattern_image(16, 16, 1, TextureKind::Type2D, 1, 0));
    let mut manager = scene.manager(test_config());
    let listener = RecordingListener::new();

    let texture = create_2d(&mut manager, "quiet.tex");
    let weak = listener.weak();
    manager.add_listener(texture, weak.clone()).unwrap();
    assert!(manager.remove_listener(texture, &weak).unwrap());
    assert!(!manager.remove_listener(texture, &weak).unwrap());

    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    pump(&mut manager, &scene.backend);
    assert!(listener.events().is_empty());
}

// ============================================================================
// Metadata cache
// ============================================================================

#[test]
fn test_metadata_cache_hit_and_out_of_date() {
    let scene = Scene::new();
    let path = std::env::temp_dir().join(format!(
        "texstream_metadata_{}_{}.ron",
        std::process::id(),
        "hit_and_out_of_date"
    ));
    let _ = std::fs::remove_file(&path);
    let config = test_config().with_metadata_cache_path(&path);
    scene.add("cached.tex", &pattern_image(64, 64, 1, TextureKind::Type2D, 1, 0));

    // first run fills the cache and saves it on drop
    {
        let mut manager = scene.manager(config.clone());
        let texture = create_2d(&mut manager, "cached.tex");
        manager
            .schedule_transition(texture, Residency::Resident)
            .unwrap();
        pump(&mut manager, &scene.backend);
        assert_eq!(manager.stats().metadata_cache_hits, 0);
    }
    assert!(path.exists());

    // second run creates storage before decoding
    {
        let mut manager = scene.manager(config.clone());
        let texture = create_2d(&mut manager, "cached.tex");
        manager
            .schedule_transition(texture, Residency::Resident)
            .unwrap();
        assert!(manager.texture(texture).unwrap().has_gpu_storage());
        pump(&mut manager, &scene.backend);
        let stats = manager.stats();
        assert_eq!(stats.metadata_cache_hits, 1);
        assert_eq!(stats.metadata_cache_mismatches, 0);
    }

    // the file changed behind the cache's back
    let replacement = pattern_image(128, 32, 1, TextureKind::Type2D, 1, 5);
    scene.add("cached.tex", &replacement);
    {
        let mut manager = scene.manager(config);
        let listener = RecordingListener::new();
        let texture = create_2d(&mut manager, "cached.tex");
        manager.add_listener(texture, listener.weak()).unwrap();
        manager
            .schedule_transition(texture, Residency::Resident)
            .unwrap();
        pump(&mut manager, &scene.backend);

        assert_eq!(manager.stats().metadata_cache_mismatches, 1);
        assert_eq!(
            listener.reasons(texture),
            vec![GainedResidency, MetadataCacheOutOfDate, ReadyForRendering]
        );
        let obj = manager.texture(texture).unwrap();
        assert_eq!((obj.width(), obj.height()), (128, 32));
        assert_eq!(
            manager.read_texture_contents(texture, 0).unwrap(),
            replacement.mip_bytes(0)
        );
        assert_eq!(
            manager.metadata_cache().get("cached.tex").unwrap().width,
            128
        );
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_unusable_metadata_cache_entry_falls_back_to_decoding() {
    let scene = Scene::new();
    let path = std::env::temp_dir().join(format!(
        "texstream_metadata_{}_{}.ron",
        std::process::id(),
        "unusable_entry"
    ));
    let mut cache = MetadataCache::new();
    cache.insert(
        "hint.tex",
        CachedMetadata {
            kind: TextureKind::Type2D,
            width: 4,
            height: 4,
            depth_or_slices: 1,
            format: PixelFormat::Rgba8Unorm,
            mip_count: 9,
            pool_id: 0,
        },
    );
    cache.save(&path).unwrap();

    let image = pattern_image(64, 64, 1, TextureKind::Type2D, 1, 8);
    scene.add("hint.tex", &image);
    let mut manager = scene.manager(test_config().with_metadata_cache_path(&path));
    let listener = RecordingListener::new();

    let texture = create_2d(&mut manager, "hint.tex");
    manager.add_listener(texture, listener.weak()).unwrap();
    manager
        .schedule_transition(texture, Residency::Resident)
        .unwrap();
    assert!(!manager.texture(texture).unwrap().has_gpu_storage());
    pump(&mut manager, &scene.backend);

    assert!(listener.errors().is_empty());
    assert_eq!(manager.stats().metadata_cache_hits, 0);
    let obj = manager.texture(texture).unwrap();
    assert!(obj.is_data_ready());
    assert_eq!((obj.width(), obj.height(), obj.mip_count()), (64, 64, 1));
    assert_eq!(
        manager.read_texture_contents(texture, 0).unwrap(),
        image.mip_bytes(0)
    );
    let entry = *manager.metadata_cache().get("hint.tex").unwrap();
    assert_eq!((entry.width, entry.mip_count), (64, 1));

    drop(manager);
    let _ = std::fs::remove_file(&path);
}
