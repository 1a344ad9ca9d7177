mod common;

use std::fs;

use kimport::library::MergeOutcome;
use kimport::{
    CancelToken, ImportConfig, ImportError, Importer, MergePolicy, Provider, TargetLibrary,
};
use tempfile::TempDir;

use common::*;

fn config(dir: &TempDir, policy: MergePolicy) -> ImportConfig {
    ImportConfig::new(dir.path()).with_policy(policy)
}

#[tokio::test]
async fn imports_a_root_layout_archive_end_to_end() {
    let dir = TempDir::new().unwrap();
    let importer = Importer::new();
    let cfg = config(&dir, MergePolicy::Skip);

    let reports = importer
        .import_archive_bytes(
            "PN123.zip",
            vendor_archive("PN123"),
            &cfg,
            &CancelToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, MergeOutcome::Added);

    let library = TargetLibrary::new(dir.path(), Provider::Snapeda);
    assert_eq!(library.symbol_names().unwrap(), vec!["PN123"]);

    // Symbol points at the footprint under the provider library name.
    let lib_text = fs::read_to_string(library.symbol_lib_path()).unwrap();
    assert!(lib_text.contains("\"Snapeda:PN123\""));

    // Footprint points at the shared 3D asset through the path variable.
    let fp_text = fs::read_to_string(library.footprint_path("PN123")).unwrap();
    assert!(fp_text.contains("${KICAD_3RD_PARTY}/3dshapes/PN123.step"));

    assert_eq!(
        fs::read(dir.path().join("3dshapes/PN123.step")).unwrap(),
        STEP
    );
}

#[tokio::test]
async fn reimport_with_skip_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let importer = Importer::new();
    let cfg = config(&dir, MergePolicy::Skip);
    let cancel = CancelToken::new();

    importer
        .import_archive_bytes("PN123.zip", vendor_archive("PN123"), &cfg, &cancel)
        .await
        .unwrap();
    let library = TargetLibrary::new(dir.path(), Provider::Snapeda);
    let before_lib = fs::read(library.symbol_lib_path()).unwrap();
    let before_fp = fs::read(library.footprint_path("PN123")).unwrap();

    let reports = importer
        .import_archive_bytes("PN123.zip", vendor_archive("PN123"), &cfg, &cancel)
        .await
        .unwrap();
    assert_eq!(reports[0].outcome, MergeOutcome::AlreadyPresent);
    assert_eq!(fs::read(library.symbol_lib_path()).unwrap(), before_lib);
    assert_eq!(fs::read(library.footprint_path("PN123")).unwrap(), before_fp);
}

#[tokio::test]
async fn default_policy_reports_conflicts_without_writing() {
    let dir = TempDir::new().unwrap();
    let importer = Importer::new();
    let cancel = CancelToken::new();

    importer
        .import_archive_bytes(
            "PN123.zip",
            vendor_archive("PN123"),
            &config(&dir, MergePolicy::Skip),
            &cancel,
        )
        .await
        .unwrap();

    let library = TargetLibrary::new(dir.path(), Provider::Snapeda);
    let before = fs::read(library.symbol_lib_path()).unwrap();

    let reports = importer
        .import_archive_bytes(
            "PN123.zip",
            vendor_archive("PN123"),
            &config(&dir, MergePolicy::PromptRequired),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(reports[0].outcome, MergeOutcome::Conflict);
    assert_eq!(fs::read(library.symbol_lib_path()).unwrap(), before);
}

#[tokio::test]
async fn overwrite_replaces_in_place_and_keeps_order() {
    let dir = TempDir::new().unwrap();
    let importer = Importer::new();
    let cancel = CancelToken::new();
    let cfg = config(&dir, MergePolicy::Overwrite);

    importer
        .import_archive_bytes("A.zip", vendor_archive("AAA"), &cfg, &cancel)
        .await
        .unwrap();
    importer
        .import_archive_bytes("B.zip", vendor_archive("BBB"), &cfg, &cancel)
        .await
        .unwrap();

    let reports = importer
        .import_archive_bytes(
            "A2.zip",
            vendor_archive_with_model("AAA", b"updated mesh"),
            &cfg,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(reports[0].outcome, MergeOutcome::Overwritten);

    let library = TargetLibrary::new(dir.path(), Provider::Snapeda);
    assert_eq!(library.symbol_names().unwrap(), vec!["AAA", "BBB"]);
    assert_eq!(
        fs::read(dir.path().join("3dshapes/AAA.step")).unwrap(),
        b"updated mesh"
    );
}

#[tokio::test]
async fn unrecognized_archive_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let importer = Importer::new();

    let err = importer
        .import_archive_bytes(
            "mystery.zip",
            zip_bytes(&[("readme.txt", b"hello")]),
            &config(&dir, MergePolicy::Skip),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::UnrecognizedFormat { .. }));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn corrupt_zip_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let importer = Importer::new();

    let err = importer
        .import_archive_bytes(
            "broken.zip",
            b"this is not a zip".to_vec(),
            &config(&dir, MergePolicy::Skip),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::CorruptArchive { .. }));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn vendor_directory_layout_routes_to_its_provider_library() {
    let dir = TempDir::new().unwrap();
    let importer = Importer::new();

    let archive = zip_bytes(&[
        ("KiCad/PN900.kicad_sym", symbol_lib("PN900").as_bytes()),
        ("KiCad/SOIC8.kicad_mod", FOOTPRINT.as_bytes()),
    ]);
    importer
        .import_archive_bytes(
            "PN900.zip",
            archive,
            &config(&dir, MergePolicy::Skip),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    let library = TargetLibrary::new(dir.path(), Provider::Samacsys);
    assert_eq!(library.symbol_names().unwrap(), vec!["PN900"]);
    assert!(library.footprint_path("PN900").exists());
}

#[tokio::test]
async fn modelless_archive_drops_the_vendor_model_reference() {
    let dir = TempDir::new().unwrap();
    let importer = Importer::new();

    // Vendor footprint text ships a reference to a file on the vendor's
    // machine; no 3D asset comes with the archive.
    let footprint = r#"(footprint "SOIC8" (layer F.Cu)
    (pad "1" smd rect (at 0 0) (size 1 1) (layers F.Cu))
    (model "C:/vendor/local/SOIC8.step" (offset (xyz 0 0 0))))"#;
    let archive = zip_bytes(&[
        ("PN123.kicad_sym", symbol_lib("PN123").as_bytes()),
        ("SOIC8.kicad_mod", footprint.as_bytes()),
    ]);
    importer
        .import_archive_bytes(
            "PN123.zip",
            archive,
            &config(&dir, MergePolicy::Skip),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    let library = TargetLibrary::new(dir.path(), Provider::Snapeda);
    let fp_text = fs::read_to_string(library.footprint_path("PN123")).unwrap();
    assert!(!fp_text.contains("model"));
    assert!(!dir.path().join("3dshapes").exists());
}

#[tokio::test]
async fn concurrent_imports_share_the_asset_directory_safely() {
    for _ in 0..20 {
        let dir = TempDir::new().unwrap();
        let importer = Importer::new();
        let cfg = config(&dir, MergePolicy::Skip);
        let cancel = CancelToken::new();

        // Three providers, same part number, each shipping a model: all
        // three land in the shared asset directory at once.
        let archives: Vec<(&str, Vec<u8>)> = vec![
            ("snapeda.zip", vendor_archive("PN123")),
            ("samacsys.zip", samacsys_archive("PN123")),
            ("ultralibrarian.zip", ultralibrarian_archive("PN123")),
        ];
        let mut set = tokio::task::JoinSet::new();
        for (name, bytes) in archives {
            let importer = importer.clone();
            let cfg = cfg.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                importer.import_archive_bytes(name, bytes, &cfg, &cancel).await
            });
        }
        while let Some(result) = set.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(
            fs::read(dir.path().join("3dshapes/PN123.step")).unwrap(),
            STEP
        );
        for provider in [
            Provider::Snapeda,
            Provider::Samacsys,
            Provider::UltraLibrarian,
        ] {
            let library = TargetLibrary::new(dir.path(), provider);
            assert_eq!(library.symbol_names().unwrap(), vec!["PN123"]);
        }
    }
}

#[cfg(unix)]
#[tokio::test]
async fn identical_models_from_different_parts_share_storage() {
    use std::os::unix::fs::MetadataExt;

    let dir = TempDir::new().unwrap();
    let importer = Importer::new();
    let cfg = config(&dir, MergePolicy::Skip);
    let cancel = CancelToken::new();

    importer
        .import_archive_bytes("A.zip", vendor_archive("AAA"), &cfg, &cancel)
        .await
        .unwrap();
    importer
        .import_archive_bytes("B.zip", vendor_archive("BBB"), &cfg, &cancel)
        .await
        .unwrap();

    let a = fs::metadata(dir.path().join("3dshapes/AAA.step")).unwrap();
    let b = fs::metadata(dir.path().join("3dshapes/BBB.step")).unwrap();
    assert_eq!(a.ino(), b.ino());

    // Removing one identity's asset leaves the other readable.
    fs::remove_file(dir.path().join("3dshapes/AAA.step")).unwrap();
    assert_eq!(fs::read(dir.path().join("3dshapes/BBB.step")).unwrap(), STEP);
}
