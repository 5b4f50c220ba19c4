fn main() {
    craftpanel_lib::run()
}
