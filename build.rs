fn main() {
    prost_build::compile_protos(&["proto/fsindex.proto"], &["proto"])
        .expect("failed to compile fsindex.proto");
}
