fn main() {
    voicechat_widget_lib::run()
}
