use meshmini::store::Storage;
use tempfile::tempdir;

#[test]
fn opens_and_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("board.db");

    let id = {
        let s = Storage::open(&path).unwrap();
        s.insert_post(100, "!aaaaaaaa", "hello", None).unwrap()
    };

    let s = Storage::open(&path).unwrap();
    let post = s.get_post(id).unwrap().unwrap();
    assert_eq!(post.body, "hello");
}
