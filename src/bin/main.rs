fn main() {
  retriever::main()
}
