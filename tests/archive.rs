use std::io::Read;

use bytes::Bytes;
use faceapp_backend::archive::package_matched;
use faceapp_backend::pipeline::matcher::MatchedImage;
use zip::ZipArchive;

fn matched(name: &str, data: &[u8]) -> MatchedImage {
    MatchedImage { name: name.to_string(), data: Bytes::copy_from_slice(data) }
}

#[test]
fn entries_use_base_filenames() {
    let data = package_matched(&[matched("dir/sub/photo.jpg", b"abc")]).unwrap();
    let mut zip = ZipArchive::new(std::io::Cursor::new(data)).unwrap();
    assert_eq!(zip.len(), 1);
    let mut entry = zip.by_index(0).unwrap();
    assert_eq!(entry.name(), "photo.jpg");
    let mut content = Vec::new();
    entry.read_to_end(&mut content).unwrap();
    assert_eq!(content, b"abc");
}

#[test]
fn duplicate_names_are_not_deduplicated() {
    let data =
        package_matched(&[matched("a.jpg", b"first"), matched("sub/a.jpg", b"second")]).unwrap();
    let mut zip = ZipArchive::new(std::io::Cursor::new(data)).unwrap();
    assert_eq!(zip.len(), 2);
    for i in 0..zip.len() {
        assert_eq!(zip.by_index(i).unwrap().name(), "a.jpg");
    }
    // Lookup by name resolves to the last-written entry.
    let mut entry = zip.by_name("a.jpg").unwrap();
    let mut content = Vec::new();
    entry.read_to_end(&mut content).unwrap();
    assert_eq!(content, b"second");
}

#[test]
fn empty_matched_set_yields_empty_archive() {
    let data = package_matched(&[]).unwrap();
    let zip = ZipArchive::new(std::io::Cursor::new(data)).unwrap();
    assert_eq!(zip.len(), 0);
}
