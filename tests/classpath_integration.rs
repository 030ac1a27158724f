use classpath_loader::config::LoaderOptions;
use classpath_loader::directory::DirectoryLoader;
use classpath_loader::index::index_file_for;
use classpath_loader::loader::Loader;
use classpath_loader::{ResourceUrl, UrlLoader};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

fn write_file(path: &Path, content: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn write_jar(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
    use std::io::Write;
    use zip::write::FileOptions;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }
    zip.finish()?;
    Ok(())
}

#[test]
fn directory_and_archive_roots_end_to_end() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    let classes = base.path().join("classes");
    let jar = base.path().join("lib/app.jar");
    write_file(&classes.join("a/Foo.class"), b"foo-from-dir")?;
    write_jar(&jar, &[("a/Bar.class", b"bar-from-jar")])?;

    for (use_index, lazy) in [(true, false), (false, false), (true, true)] {
        let loader = UrlLoader::builder()
            .urls([&classes, &jar])
            .use_index(use_index)
            .lazy_indexing(lazy)
            .build();

        let foo = loader.resolve_class("a.Foo")?.expect("a.Foo");
        assert_eq!(foo.bytes, b"foo-from-dir");
        assert!(matches!(foo.url, ResourceUrl::File(_)));

        let bar = loader.resolve_class("a.Bar")?.expect("a.Bar");
        assert_eq!(bar.bytes, b"bar-from-jar");
        assert!(matches!(bar.url, ResourceUrl::ArchiveEntry { .. }));

        assert!(loader.resolve_class("a.Missing")?.is_none());
        assert_eq!(loader.class_path().loader_count(), 2);
    }
    Ok(())
}

#[test]
fn earliest_declared_root_wins_regardless_of_threads() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    let first = base.path().join("first.jar");
    let second = base.path().join("second");
    write_jar(&first, &[("conf/shared.properties", b"first")])?;
    write_file(&second.join("conf/shared.properties"), b"second")?;

    for threads in [1usize, 8] {
        let loader = UrlLoader::builder().urls([&first, &second]).build();
        std::thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    let found = loader.resolve_resource("conf/shared.properties").unwrap();
                    assert_eq!(found.bytes().unwrap(), b"first");
                });
            }
        });
    }
    Ok(())
}

#[test]
fn concurrent_resolution_matches_single_threaded_baseline() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    let mut roots = Vec::new();
    for r in 0..4 {
        let jar = base.path().join(format!("lib{r}.jar"));
        let entries: Vec<(String, Vec<u8>)> = (0..30)
            .filter(|i| i % 4 == r)
            .map(|i| (format!("p{}/C{i}.class", i % 3), format!("jar{r}-{i}").into_bytes()))
            .collect();
        let borrowed: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(n, b)| (n.as_str(), b.as_slice()))
            .collect();
        write_jar(&jar, &borrowed)?;
        roots.push(jar);

        let dir = base.path().join(format!("dir{r}"));
        for i in (0..30).filter(|i| i % 5 == r) {
            write_file(
                &dir.join(format!("p{}/C{i}.class", i % 3)),
                format!("dir{r}-{i}").as_bytes(),
            )?;
        }
        roots.push(dir);
    }

    // 100 names, about a third of them absent
    let names: Vec<String> = (0..100).map(|i| format!("p{}.C{}", i % 3, i % 45)).collect();

    let baseline_loader = UrlLoader::builder().urls(&roots).build();
    let mut baseline: HashMap<String, Option<Vec<u8>>> = HashMap::new();
    for name in &names {
        let bytes = baseline_loader.resolve_class(name)?.map(|c| c.bytes.clone());
        baseline.insert(name.clone(), bytes);
    }
    assert!(baseline.values().any(Option::is_none));
    assert!(baseline.values().any(Option::is_some));

    let loader = Arc::new(UrlLoader::builder().urls(&roots).build());
    std::thread::scope(|s| {
        for t in 0..8 {
            let loader = Arc::clone(&loader);
            let names = &names;
            let baseline = &baseline;
            s.spawn(move || {
                for k in 0..names.len() {
                    let name = &names[(k + t * 13) % names.len()];
                    let got = loader.resolve_class(name).unwrap().map(|c| c.bytes.clone());
                    assert_eq!(&got, &baseline[name], "{name}");
                }
            });
        }
    });
    Ok(())
}

#[test]
fn manifest_class_path_pulls_in_dependent_archives() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    let pathing = base.path().join("classpath-launcher.jar");
    let dependent = base.path().join("deps/only-here.jar");
    write_jar(
        &pathing,
        &[(
            "META-INF/MANIFEST.MF",
            b"Manifest-Version: 1.0\r\nClass-Path: deps/only-here.jar\r\n\r\n",
        )],
    )?;
    write_jar(&dependent, &[("hidden/Dep.class", b"dep")])?;

    let loader = UrlLoader::builder().add_url(&pathing).build();
    assert_eq!(loader.resolve_class("hidden.Dep")?.expect("hidden.Dep").bytes, b"dep");

    // Only archives named like pathing jars are expanded.
    let plain = base.path().join("launcher.jar");
    std::fs::copy(&pathing, &plain)?;
    let loader = UrlLoader::builder().add_url(&plain).build();
    assert!(loader.resolve_class("hidden.Dep")?.is_none());
    Ok(())
}

#[test]
fn persisted_directory_index_round_trips() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    let root = base.path().join("out");
    for name in ["a/b/One.class", "a/b/Two.class", "a/Three.class", "res/app.yml", "top.txt"] {
        write_file(&root.join(name), b"x")?;
    }

    let persisted = LoaderOptions {
        use_persisted_directory_index: true,
        ..LoaderOptions::default()
    };
    let written = DirectoryLoader::new(root.clone(), &persisted, None).build_index()?;
    assert!(index_file_for(&root).exists());

    let reloaded = DirectoryLoader::new(root.clone(), &persisted, None).build_index()?;
    let fresh = DirectoryLoader::new(root.clone(), &LoaderOptions::default(), None).build_index()?;

    for data in [&reloaded, &fresh] {
        assert_eq!(data.class_package_hashes, written.class_package_hashes);
        assert_eq!(data.resource_package_hashes, written.resource_package_hashes);
    }
    for name in ["a/b/One.class", "a/Three.class", "res/app.yml", "a/b/Nope.class", "zz/q.txt"] {
        assert_eq!(reloaded.might_contain(name), fresh.might_contain(name), "{name}");
    }
    Ok(())
}

#[test]
fn filter_rejection_implies_lookup_miss() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    let root = base.path().join("out");
    for i in 0..50 {
        write_file(&root.join(format!("pkg/Present{i}.class")), b"x")?;
    }
    let loader = DirectoryLoader::new(root, &LoaderOptions::default(), None);
    loader.build_index()?;

    for i in 0..500 {
        let name = format!("pkg/Maybe{i}.class");
        if !loader.contains_name(&name) {
            assert!(loader.get_resource(&name).is_none());
        }
    }
    for i in 0..50 {
        assert!(loader.contains_name(&format!("pkg/Present{i}.class")));
    }
    Ok(())
}

#[test]
fn enumeration_lists_every_root_in_order() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    let a = base.path().join("a.jar");
    let b = base.path().join("b");
    let c = base.path().join("c.jar");
    write_jar(&a, &[("META-INF/services/demo.Plugin", b"a")])?;
    write_file(&b.join("META-INF/services/demo.Plugin"), b"b")?;
    write_jar(&c, &[("other.txt", b"c")])?;

    let loader = UrlLoader::builder().urls([&a, &b, &c]).build();
    let urls: Vec<String> = loader
        .enumerate_resources("/META-INF/services/demo.Plugin")
        .map(|u| u.to_string())
        .collect();
    assert_eq!(urls.len(), 2);
    assert!(urls[0].starts_with("jar:file:"));
    assert!(urls[0].ends_with("a.jar!/META-INF/services/demo.Plugin"));
    assert!(urls[1].starts_with("file:"));

    // a fresh call enumerates again
    assert_eq!(loader.enumerate_resources("META-INF/services/demo.Plugin").count(), 2);
    Ok(())
}

#[test]
fn names_escaping_a_root_resolve_to_nothing() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    let classes = base.path().join("classes");
    write_file(&classes.join("a/Foo.class"), b"foo")?;
    write_file(&base.path().join("secret.txt"), b"outside")?;

    for (use_index, lazy) in [(true, false), (false, false), (true, true)] {
        let loader = UrlLoader::builder()
            .add_url(&classes)
            .use_index(use_index)
            .lazy_indexing(lazy)
            .allow_bootstrap_fallback(false)
            .build();

        for name in ["../secret.txt", "a/../../secret.txt", "./a/Foo.class", "a//Foo.class"] {
            assert!(loader.resolve_resource(name).is_none(), "{name}");
            assert_eq!(loader.enumerate_resources(name).count(), 0, "{name}");
        }
        assert!(loader.resolve_class("...Evil")?.is_none());
        assert!(loader.resolve_resource("a/Foo.class").is_some());
    }
    Ok(())
}
