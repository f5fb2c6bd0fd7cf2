fn main() {
    ctg_guardian_lib::run()
}
